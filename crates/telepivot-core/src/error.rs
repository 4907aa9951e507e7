//! Error and diagnostic types for telepivot-core
//!
//! Three families of failures exist and they are handled very differently:
//!
//! - [`Error`]: construction and configuration failures. Fatal, surfaced to
//!   whoever builds the pipeline.
//! - [`TransformError`]: a single record could not be transformed. The
//!   pipeline isolates it, the rest of the batch keeps going.
//! - [`InvariantViolation`]: a step broke its own contract. Aborts the batch.
//!
//! Warnings are [`Diagnostic`] values returned next to results.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Result type alias for telepivot-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or (de)serializing pipelines
#[derive(Error, Debug)]
pub enum Error {
    /// No transformation registered under the requested kind
    #[error("unknown transformation kind '{kind}'")]
    UnknownTransformationKind {
        /// The kind that was looked up
        kind: String,
    },

    /// A registered constructor rejected its parameters
    #[error("invalid configuration for transformation '{kind}': {message}")]
    InvalidTransformationConfig {
        /// Kind of the transformation being built
        kind: String,
        /// Description of what's invalid
        message: String,
    },

    /// Two constructors registered under the same key
    #[error("transformation key '{kind}' is already registered")]
    DuplicateTransformationKey {
        /// The duplicated key
        kind: String,
    },

    /// The transformation cannot be dumped back to a configuration document
    #[error("transformation '{kind}' does not support serialization")]
    NotSerializable {
        /// Kind of the transformation
        kind: String,
    },

    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Connector error
    #[error("connector '{connector}' error: {message}")]
    ConnectorError {
        /// Name of the connector
        connector: String,
        /// Description of the error
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidTransformationConfig`]
    pub fn invalid_config(kind: &str, message: impl fmt::Display) -> Self {
        Self::InvalidTransformationConfig {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

/// A record-level failure. The pipeline turns these into an absorbing error
/// state for the offending record only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The raw record does not have the `keys`/`content` shape
    #[error("malformed record: {message}")]
    MalformedRecord {
        /// What is missing or wrong
        message: String,
    },

    /// Flattening could not find a free name for a child field
    #[error("could not find a free name for '{child}' at '{path}'")]
    NameCollisionUnresolved {
        /// Path of the field being flattened
        path: String,
        /// Child field name that collided
        child: String,
    },

    /// A key does not have the type its configuration expects
    #[error("key '{key}' at '{path}': {message}")]
    KeyTypeMismatch {
        /// Encoding path of the record
        path: String,
        /// Key name
        key: String,
        /// Description of the mismatch
        message: String,
    },

    /// A value could not be converted to the requested type
    #[error("could not convert '{value}' at '{path}' to {target}")]
    NotConvertible {
        /// Path of the field
        path: String,
        /// Textual form of the value
        value: String,
        /// Requested type
        target: &'static str,
    },

    /// The step needs the record content to be a field container
    #[error("content of '{path}' is not a field container")]
    ContentNotAField {
        /// Encoding path of the record
        path: String,
    },

    /// A step nested in a composite step failed
    #[error("step '{step}': {error}")]
    Nested {
        /// Name of the innermost failing step
        step: String,
        /// What it raised
        error: Box<TransformError>,
        /// Warnings raised inside the composite step before the failure
        warnings: Vec<Diagnostic>,
    },
}

impl TransformError {
    /// Shorthand for [`TransformError::MalformedRecord`]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Attribute an error to the inner step `step` of a composite step.
    /// An error that already names its step keeps that name; the earlier
    /// `warnings` go in front of the ones it carries.
    pub fn nested(
        step: impl Into<String>,
        error: TransformError,
        mut warnings: Vec<Diagnostic>,
    ) -> Self {
        match error {
            Self::Nested {
                step,
                error,
                warnings: inner,
            } => {
                warnings.extend(inner);
                Self::Nested {
                    step,
                    error,
                    warnings,
                }
            }
            error => Self::Nested {
                step: step.into(),
                error: Box::new(error),
                warnings,
            },
        }
    }

    /// Split into the name of the step that raised the error, if it was
    /// nested, the error itself and the warnings raised before it
    pub fn into_origin(self) -> (Option<String>, TransformError, Vec<Diagnostic>) {
        match self {
            Self::Nested {
                step,
                error,
                warnings,
            } => (Some(step), *error, warnings),
            error => (None, error, Vec::new()),
        }
    }
}

/// A broken step contract. Never isolated: the whole batch aborts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A 1-to-1 step produced a different number of records
    #[error("converter '{step}' produced {count} records, expected exactly one")]
    MultipleResultsFromConverter {
        /// Step name
        step: String,
        /// How many records it produced
        count: usize,
    },

    /// A composite step was given a child of the wrong family
    #[error("step '{step}' expected a {expected} transformation")]
    UnexpectedStrategy {
        /// Step name
        step: String,
        /// Family that was required
        expected: &'static str,
    },
}

/// What a step can fail with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// Isolated per record
    #[error(transparent)]
    Record(#[from] TransformError),

    /// Aborts the batch
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl StepError {
    /// Attribute a record failure to the inner step `step` of a composite
    /// step. Contract violations pass through.
    pub fn nested(self, step: impl Into<String>, warnings: Vec<Diagnostic>) -> Self {
        match self {
            Self::Record(error) => Self::Record(TransformError::nested(step, error, warnings)),
            violation => violation,
        }
    }
}

/// Category of a [`Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A raw field had no name; it was called `Unknown`
    UnknownField,
    /// A raw leaf had no typed value; it was skipped
    EmptyValue,
    /// A list was stringified instead of flattened
    FlattenedList,
    /// Flattening produced a name that already existed
    ExistingNameInFlattening,
    /// A flattening path pointed at a scalar
    InvalidFlatteningPath,
    /// A rename target already existed
    ExistingName,
    /// Repeated keys were expanded into numbered names
    KeysWithDoubleName,
    /// A list split target was not a list
    NotAList,
    /// Record content was neither a field container nor a list
    NonHierarchicalContent,
    /// Emitted on purpose by the `dummy` step
    Dummy,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A non-fatal finding reported alongside a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Category
    pub kind: DiagnosticKind,
    /// Human readable message
    pub message: String,
    /// Structured context (path, key names, ...)
    pub fields: BTreeMap<String, String>,
}

impl Diagnostic {
    /// Create a diagnostic without context fields
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a context field
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}
