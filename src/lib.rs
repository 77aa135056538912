pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod pipeline;

// Application layer and the adapters behind its ports
pub mod app;
pub mod infra;

pub use config::PipelineConfig;
pub use domain::{Batch, FieldType, RawBatch, Record, Value};
pub use error::{EtlError, FieldCastError, QualityGateFailure, Result, RuleEvaluationError};
