//! The transformation step contract
//!
//! Every step takes one record and returns zero or more records plus the
//! warnings it produced. Content transformations are always 1-to-1; the
//! pipeline calls them through [`Transformation::convert`], which enforces
//! that.

use std::fmt;

use serde_json::Value;

use crate::engine::{ContentTransformation, MetricSplitting};
use crate::error::{Diagnostic, Error, InvariantViolation, Result, StepError};
use crate::metric::MetricRecord;

/// Records and warnings produced by one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    /// Produced records, in order
    pub metrics: Vec<MetricRecord>,
    /// Warnings raised while producing them
    pub warnings: Vec<Diagnostic>,
}

impl Output {
    /// A single record, no warnings
    pub fn one(metric: MetricRecord) -> Self {
        Self {
            metrics: vec![metric],
            warnings: Vec::new(),
        }
    }

    /// Nothing at all (the record was filtered)
    pub fn none() -> Self {
        Self::default()
    }

    /// Attach a warning
    pub fn warn(mut self, warning: Diagnostic) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// Result of a 1-to-1 application
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    /// The transformed record
    pub metric: MetricRecord,
    /// Warnings raised
    pub warnings: Vec<Diagnostic>,
}

/// A pipeline step
pub trait Transformation: Send + Sync + fmt::Debug {
    /// Registry key of this step
    fn kind(&self) -> &'static str;

    /// Name used in failures and logs
    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Apply the step to one record
    fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError>;

    /// Apply the step and require exactly one record back
    fn convert(&self, metric: &MetricRecord) -> std::result::Result<Converted, StepError> {
        let mut output = self.transform(metric)?;
        if output.metrics.len() != 1 {
            return Err(InvariantViolation::MultipleResultsFromConverter {
                step: self.name(),
                count: output.metrics.len(),
            }
            .into());
        }
        let metric = output.metrics.remove(0);
        Ok(Converted {
            metric,
            warnings: output.warnings,
        })
    }

    /// Parameters of this step, as accepted by its registry constructor
    fn to_config(&self) -> Result<Value> {
        Err(Error::NotSerializable {
            kind: self.kind().to_string(),
        })
    }

    /// The content strategy, for steps that rewrite content 1-to-1
    fn as_content(&self) -> Option<&dyn ContentTransformation> {
        None
    }

    /// The splitting strategy, for steps that emit new records
    fn as_splitting(&self) -> Option<&dyn MetricSplitting> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentTree;

    #[derive(Debug)]
    struct Twice;

    impl Transformation for Twice {
        fn kind(&self) -> &'static str {
            "twice"
        }

        fn transform(&self, metric: &MetricRecord) -> std::result::Result<Output, StepError> {
            Ok(Output {
                metrics: vec![metric.clone(), metric.clone()],
                warnings: Vec::new(),
            })
        }
    }

    #[test]
    fn test_convert_rejects_multiple_results() {
        let metric = MetricRecord::new("p", ContentTree::empty());
        let err = Twice.convert(&metric).unwrap_err();
        assert_eq!(
            err,
            StepError::Invariant(InvariantViolation::MultipleResultsFromConverter {
                step: "twice".into(),
                count: 2,
            })
        );
    }

    #[test]
    fn test_default_to_config_is_not_serializable() {
        assert!(matches!(
            Twice.to_config(),
            Err(Error::NotSerializable { .. })
        ));
    }
}
