//! Telepivot Core Library
//!
//! This crate provides the core functionality for telepivot:
//! - Path index over configured encoding paths
//! - EAV pivot of self-describing key/value telemetry
//! - Recursive content-transformation engine
//! - Pipelines with per-record outcome propagation
//! - Declarative transformation registry
//! - Configuration parsing and file connectors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connector  │────▶│    Pivot    │────▶│  Pipeline   │────▶│  Connector  │
//! │    Input    │     │  (EAV→tree) │     │   (steps)   │     │   Output    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use telepivot_core::{Config, Pivot, default_registry};
//!
//! let config = Config::load("./telepivot.yaml")?;
//! let pipeline = config.build_pipeline(default_registry()?)?;
//! let pivot = Pivot::new(config.project.pivot.clone());
//! let state = pipeline.run(pivot.pivot_message(&message))?;
//! for metric in state.metrics() {
//!     println!("{}", metric.to_flat_json());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectors;
pub mod content;
pub mod engine;
pub mod error;
pub mod metric;
pub mod path_index;
pub mod pipeline;
pub mod pivot;
pub mod registry;
pub mod transformation;
pub mod transforms;

pub use config::{Config, PipelineDocument, ProjectConfig};
pub use content::{ContentTree, Fields, Headers, Scalar};
pub use error::{
    Diagnostic, DiagnosticKind, Error, InvariantViolation, Result, StepError, TransformError,
};
pub use metric::MetricRecord;
pub use path_index::PathIndex;
pub use pipeline::{MetricState, Pipeline, StepFailure, TransformationState, apply_transformation};
pub use pivot::{Pivot, PivotOptions, TelemetryMessage};
pub use registry::{Registry, TransformationDoc, default_registry};
pub use transformation::{Output, Transformation};
