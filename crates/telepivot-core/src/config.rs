//! Configuration parsing and validation
//!
//! This module handles loading and validating telepivot project files.
//!
//! # Configuration Files
//!
//! - `telepivot.yaml` - Project root configuration: connectors, pivot
//!   options, runtime settings and the transformation pipeline
//!
//! ```yaml
//! name: interfaces
//! input:
//!   type: file
//!   path: data/input.jsonl
//! output:
//!   type: file
//!   path: data/output.jsonl
//! transformations:
//!   - kind: extra_keys
//!     config:
//!       path_list: [model:interfaces/interface/name]
//!   - kind: flatten_hierarchies
//!     config: {}
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::connectors::ConnectorConfig;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::pivot::PivotOptions;
use crate::registry::{Registry, TransformationDoc};

/// Name of the project file looked up inside a project directory
pub const PROJECT_FILE: &str = "telepivot.yaml";

/// Root project configuration from `telepivot.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,

    /// Where collection messages come from
    pub input: ConnectorConfig,

    /// Where exported records go
    pub output: ConnectorConfig,

    /// Pivot options
    #[serde(default)]
    pub pivot: PivotOptions,

    /// Runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Transformation pipeline
    #[serde(default)]
    pub transformations: PipelineDocument,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker tasks transforming messages
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Shape of exported records
    #[serde(default)]
    pub projection: Projection,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            projection: Projection::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}

/// Shape of exported records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Content, keys and headers merged into one object
    #[default]
    Flat,
    /// `{ encoding_path, keys, content, headers }`
    Record,
}

/// The `transformations` entry: one document, or a list run in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineDocument {
    /// A single step
    Single(TransformationDoc),
    /// Steps in sequence
    Sequence(Vec<TransformationDoc>),
}

impl Default for PipelineDocument {
    fn default() -> Self {
        Self::Sequence(Vec::new())
    }
}

impl PipelineDocument {
    /// Build the pipeline
    pub fn build(&self, registry: &Registry) -> Result<Pipeline> {
        let steps = match self {
            Self::Single(doc) => vec![registry.load(doc)?],
            Self::Sequence(docs) => registry.load_all(docs)?,
        };
        Ok(Pipeline::new(steps))
    }

    /// Normalized document of a built pipeline
    pub fn from_pipeline(registry: &Registry, pipeline: &Pipeline) -> Result<Self> {
        Ok(Self::Sequence(registry.dump_all(pipeline.steps())?))
    }

    /// Content hash of the document, stable across loads and dumps
    pub fn fingerprint(&self) -> Result<String> {
        let docs = match self {
            Self::Single(doc) => std::slice::from_ref(doc),
            Self::Sequence(docs) => docs.as_slice(),
        };
        let bytes = serde_json::to_vec(docs)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Base path of the project
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a directory
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the project directory or telepivot.yaml file
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./my-project")?;
    /// println!("Project: {}", config.project.name);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(PROJECT_FILE), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let project: ProjectConfig = serde_yaml::from_str(&contents)?;
        if project.runtime.workers == 0 {
            return Err(Error::ConfigInvalid {
                message: "runtime.workers must be at least 1".to_string(),
            });
        }

        Ok(Self { project, base_path })
    }

    /// Build the configured pipeline
    pub fn build_pipeline(&self, registry: &Registry) -> Result<Pipeline> {
        self.project.transformations.build(registry)
    }

    /// Input connector configuration, paths anchored at the project
    pub fn input(&self) -> ConnectorConfig {
        self.project.input.resolve(&self.base_path)
    }

    /// Output connector configuration, paths anchored at the project
    pub fn output(&self) -> ConnectorConfig {
        self.project.output.resolve(&self.base_path)
    }
}
