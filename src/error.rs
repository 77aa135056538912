use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FieldType;
use crate::pipeline::processing::quality_gate::QualityReport;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extract failed for source '{source_id}': {message}")]
    Extract { source_id: String, message: String },

    #[error("Load failed: {message}")]
    Load { message: String },

    #[error("Branch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    QualityGate(#[from] QualityGateFailure),
}

pub type Result<T> = std::result::Result<T, EtlError>;

/// A single field could not be cast to its declared type.
///
/// Recovered locally by the cleaner: the field is nulled and the error is kept
/// on the record as a warning.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("field '{field}' could not be cast to {expected}: {raw:?}")]
pub struct FieldCastError {
    pub field: String,
    pub expected: FieldType,
    pub raw: String,
}

/// A rule predicate could not be evaluated against a record.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rule '{rule_id}' failed to evaluate: {message}")]
pub struct RuleEvaluationError {
    pub rule_id: String,
    pub message: String,
}

/// Batch-level quality gate failure. Carries the full report so the caller can
/// decide whether to halt or proceed.
#[derive(Error, Debug, Clone)]
#[error("quality gate failed: {}", .report.summary())]
pub struct QualityGateFailure {
    pub report: Box<QualityReport>,
}
