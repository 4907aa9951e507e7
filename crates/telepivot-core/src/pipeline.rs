//! Pipelines and per-record outcome propagation
//!
//! A batch of records moves through an ordered list of steps. Each record
//! carries a [`MetricState`]: either a good record with the warnings that
//! accumulated on the way, or an error that remembers the failing step and
//! the last good record. Errors are absorbing: later steps skip them. A
//! broken step contract ([`InvariantViolation`]) is the only thing that
//! aborts the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::error::{Diagnostic, InvariantViolation, Result, StepError, TransformError};
use crate::metric::MetricRecord;
use crate::registry::{Registry, TransformationDoc, parse_config};
use crate::transformation::{Output, Transformation};

/// Which step failed a record, and how
#[derive(Error, Debug, Clone, PartialEq)]
#[error("step '{step}' failed: {error}")]
pub struct StepFailure {
    /// Name of the failing step
    pub step: String,
    /// Record-level error it raised
    pub error: TransformError,
}

impl StepFailure {
    /// Failure of `step`, attributed to the nested step that raised it, with
    /// the warnings `step` collected before failing
    fn raised_by(step: &dyn Transformation, error: TransformError) -> (Self, Vec<Diagnostic>) {
        let (inner, error, warnings) = error.into_origin();
        let failure = Self {
            step: inner.unwrap_or_else(|| step.name()),
            error,
        };
        (failure, warnings)
    }
}

/// Outcome of one record so far
#[derive(Debug, Clone, PartialEq)]
pub enum MetricState {
    /// The record is still good
    Ok {
        /// Current record
        metric: MetricRecord,
        /// Warnings accumulated by this record
        warnings: Vec<Diagnostic>,
    },
    /// A step failed the record; nothing else happens to it
    Error {
        /// The failure
        failure: StepFailure,
        /// Warnings accumulated before the failure
        warnings: Vec<Diagnostic>,
        /// Input of the failing step, if there was one
        last_good: Option<MetricRecord>,
    },
}

impl MetricState {
    /// Start tracking a record
    pub fn new(metric: MetricRecord) -> Self {
        Self::Ok {
            metric,
            warnings: Vec::new(),
        }
    }

    /// Is this an error state?
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The current record of a good state
    pub fn metric(&self) -> Option<&MetricRecord> {
        match self {
            Self::Ok { metric, .. } => Some(metric),
            Self::Error { .. } => None,
        }
    }

    /// The failure of an error state
    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { failure, .. } => Some(failure),
        }
    }

    /// The last good record of an error state
    pub fn error_metric(&self) -> Option<&MetricRecord> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { last_good, .. } => last_good.as_ref(),
        }
    }

    /// Warnings accumulated by this record
    pub fn warnings(&self) -> &[Diagnostic] {
        match self {
            Self::Ok { warnings, .. } | Self::Error { warnings, .. } => warnings,
        }
    }

    /// Apply a 1-to-1 step
    pub fn convert(
        self,
        step: &dyn Transformation,
    ) -> std::result::Result<Self, InvariantViolation> {
        let Self::Ok {
            metric,
            mut warnings,
        } = self
        else {
            return Ok(self);
        };
        match step.convert(&metric) {
            Ok(converted) => {
                warnings.extend(converted.warnings);
                Ok(Self::Ok {
                    metric: converted.metric,
                    warnings,
                })
            }
            Err(StepError::Record(error)) => {
                let (failure, inner) = StepFailure::raised_by(step, error);
                warnings.extend(inner);
                Ok(Self::Error {
                    failure,
                    warnings,
                    last_good: Some(metric),
                })
            }
            Err(StepError::Invariant(violation)) => Err(violation),
        }
    }

    /// Apply 1-to-1 steps in order
    pub fn pipeline(
        self,
        steps: &[Box<dyn Transformation>],
    ) -> std::result::Result<Self, InvariantViolation> {
        steps
            .iter()
            .try_fold(self, |state, step| state.convert(step.as_ref()))
    }

    /// The record, or the failure that stopped it
    pub fn into_result(self) -> std::result::Result<MetricRecord, StepFailure> {
        match self {
            Self::Ok { metric, .. } => Ok(metric),
            Self::Error { failure, .. } => Err(failure),
        }
    }
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformationState {
    /// One state per record, in order
    pub states: Vec<MetricState>,
    /// Every warning raised while producing this batch
    pub warnings: Vec<Diagnostic>,
}

impl TransformationState {
    /// A batch holding a single record
    pub fn from_metric(metric: MetricRecord) -> Self {
        Self {
            states: vec![MetricState::new(metric)],
            warnings: Vec::new(),
        }
    }

    /// Apply a step to every good record. Each produced record inherits the
    /// warnings of its parent plus those of the step.
    pub fn transform(
        self,
        step: &dyn Transformation,
    ) -> std::result::Result<Self, InvariantViolation> {
        let mut states = Vec::with_capacity(self.states.len());
        let mut batch_warnings = self.warnings;
        for state in self.states {
            let MetricState::Ok { metric, warnings } = state else {
                states.push(state);
                continue;
            };
            match step.transform(&metric) {
                Ok(output) => {
                    trace!(
                        step = %step.name(),
                        path = metric.path(),
                        produced = output.metrics.len(),
                        "step applied"
                    );
                    let mut inherited = warnings;
                    inherited.extend(output.warnings.iter().cloned());
                    batch_warnings.extend(output.warnings);
                    states.extend(output.metrics.into_iter().map(|metric| MetricState::Ok {
                        metric,
                        warnings: inherited.clone(),
                    }));
                }
                Err(StepError::Record(error)) => {
                    trace!(step = %step.name(), path = metric.path(), %error, "record failed");
                    let (failure, inner) = StepFailure::raised_by(step, error);
                    let mut warnings = warnings;
                    warnings.extend(inner.iter().cloned());
                    batch_warnings.extend(inner);
                    states.push(MetricState::Error {
                        failure,
                        warnings,
                        last_good: Some(metric),
                    });
                }
                Err(StepError::Invariant(violation)) => return Err(violation),
            }
        }
        Ok(Self {
            states,
            warnings: batch_warnings,
        })
    }

    /// Apply steps in order
    pub fn pipeline(
        self,
        steps: &[Box<dyn Transformation>],
    ) -> std::result::Result<Self, InvariantViolation> {
        steps
            .iter()
            .try_fold(self, |state, step| state.transform(step.as_ref()))
    }

    /// Good records, in order
    pub fn metrics(&self) -> impl Iterator<Item = &MetricRecord> {
        self.states.iter().filter_map(MetricState::metric)
    }

    /// Error states, in order
    pub fn errors(&self) -> impl Iterator<Item = &MetricState> {
        self.states.iter().filter(|state| state.is_error())
    }
}

/// Run `steps` over one record and hand back the surviving records
///
/// `on_error` sees every failure with the last good record; `on_warnings`
/// sees the batch warnings once, when there are any.
pub fn apply_transformation<E, W>(
    metric: MetricRecord,
    steps: &[Box<dyn Transformation>],
    mut on_error: E,
    mut on_warnings: W,
) -> std::result::Result<Vec<MetricRecord>, InvariantViolation>
where
    E: FnMut(&StepFailure, Option<&MetricRecord>),
    W: FnMut(&[Diagnostic]),
{
    let state = TransformationState::from_metric(metric).pipeline(steps)?;
    if !state.warnings.is_empty() {
        on_warnings(&state.warnings);
    }
    let mut metrics = Vec::new();
    for record in state.states {
        match record {
            MetricState::Ok { metric, .. } => metrics.push(metric),
            MetricState::Error {
                failure, last_good, ..
            } => on_error(&failure, last_good.as_ref()),
        }
    }
    Ok(metrics)
}

/// Configuration of a [`Pipeline`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Steps, in order
    #[serde(default)]
    pub transformations: Vec<TransformationDoc>,
}

/// Ordered steps applied as a single step
#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Transformation>>,
}

impl Pipeline {
    /// Registry key
    pub const KIND: &'static str = "pipeline";

    /// Wrap steps
    pub fn new(steps: Vec<Box<dyn Transformation>>) -> Self {
        Self { steps }
    }

    /// Steps, in order
    pub fn steps(&self) -> &[Box<dyn Transformation>] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when there are no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run a batch through every step
    pub fn run(
        &self,
        state: TransformationState,
    ) -> std::result::Result<TransformationState, InvariantViolation> {
        state.pipeline(&self.steps)
    }

    /// Registry constructor
    pub fn from_config(registry: &Registry, config: Value) -> Result<Box<dyn Transformation>> {
        let config: PipelineConfig = parse_config(Self::KIND, config)?;
        Ok(Box::new(Self::new(registry.load_all(&config.transformations)?)))
    }
}

impl Transformation for Pipeline {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
        let mut current = vec![metric.clone()];
        let mut warnings = Vec::new();
        for step in &self.steps {
            let mut next = Vec::with_capacity(current.len());
            for metric in &current {
                let output = step
                    .transform(metric)
                    .map_err(|err| err.nested(step.name(), warnings.clone()))?;
                next.extend(output.metrics);
                warnings.extend(output.warnings);
            }
            current = next;
        }
        Ok(Output {
            metrics: current,
            warnings,
        })
    }

    fn to_config(&self) -> Result<Value> {
        let config = PipelineConfig {
            transformations: self
                .steps
                .iter()
                .map(|step| TransformationDoc::from_step(step.as_ref()))
                .collect::<Result<_>>()?,
        };
        Ok(serde_json::to_value(config)?)
    }
}
