use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::FieldType;
use crate::error::{EtlError, Result};
use crate::pipeline::processing::rules::RuleConfig;

pub const DEFAULT_CONFIG_PATH: &str = "etl.toml";
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.95;

pub const ENV_QUALITY_THRESHOLD: &str = "ETL_QUALITY_THRESHOLD";
pub const ENV_ON_GATE_FAILURE: &str = "ETL_ON_GATE_FAILURE";

/// Top-level pipeline configuration, read from `etl.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    /// Declared schema, keyed by field name
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    /// Ordered business rules
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    /// Minimum overall score for the gate to pass
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub weights: DimensionWeights,
    #[serde(default)]
    pub on_failure: GateFailurePolicy,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_QUALITY_THRESHOLD,
            weights: DimensionWeights::default(),
            on_failure: GateFailurePolicy::default(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_QUALITY_THRESHOLD
}

fn default_weight() -> f64 {
    1.0
}

/// Relative weight of each quality dimension in the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    #[serde(default = "default_weight")]
    pub completeness: f64,
    #[serde(default = "default_weight")]
    pub accuracy: f64,
    #[serde(default = "default_weight")]
    pub consistency: f64,
    #[serde(default = "default_weight")]
    pub uniqueness: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            accuracy: 1.0,
            consistency: 1.0,
            uniqueness: 1.0,
        }
    }
}

impl DimensionWeights {
    pub fn as_array(&self) -> [f64; 4] {
        [self.completeness, self.accuracy, self.consistency, self.uniqueness]
    }
}

/// What the caller does with a batch that fails the quality gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailurePolicy {
    /// Stop the run before loading
    #[default]
    Halt,
    /// Load the degraded batch and log the failure
    Proceed,
}

impl std::str::FromStr for GateFailurePolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Ok(GateFailurePolicy::Halt),
            "proceed" => Ok(GateFailurePolicy::Proceed),
            other => Err(EtlError::Config(format!(
                "unknown gate failure policy '{}' (expected 'halt' or 'proceed')",
                other
            ))),
        }
    }
}

/// Declared type and null handling for one field
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Counted by the completeness dimension when null
    #[serde(default)]
    pub required: bool,
    /// Value filled in when the field is null after cleaning
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Remove the field from the record when it is null
    #[serde(default)]
    pub drop_null: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            drop_null: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn dropping_nulls(mut self) -> Self {
        self.drop_null = true;
        self
    }
}

/// An extract source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLocation {
    /// JSON array or NDJSON file
    File { path: PathBuf },
    /// JSON document over HTTP
    Http {
        url: String,
        /// JSON pointer to the records array, e.g. `/data/jobs`
        #[serde(default)]
        records_pointer: Option<String>,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u64,
    },
}

fn default_timeout_seconds() -> u64 {
    30
}

/// How records with the same key are resolved in the warehouse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep whichever record was extracted most recently
    #[default]
    NewestWins,
    /// The incoming record always replaces the stored one
    LastWriteWins,
    /// The stored record is never replaced
    FirstWriteWins,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadConfig {
    /// Natural key used for upserts
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub conflict: ConflictPolicy,
    /// NDJSON warehouse file; in-memory when absent
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// SQLite execution log; disabled when absent
    #[serde(default)]
    pub execution_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_file")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_prefix: default_log_file(),
        }
    }
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file() -> String {
    "jobs_etl.log".to_string()
}

impl PipelineConfig {
    /// Read, apply environment overrides, and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(
            path = %path.display(),
            fields = config.fields.len(),
            rules = config.rules.len(),
            sources = config.sources.len(),
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `ETL_*` overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_QUALITY_THRESHOLD) {
            let threshold: f64 = raw.trim().parse().map_err(|_| {
                EtlError::Config(format!("{} is not a number: '{}'", ENV_QUALITY_THRESHOLD, raw))
            })?;
            info!(threshold, "Quality threshold overridden from environment");
            self.quality.threshold = threshold;
        }
        if let Some(raw) = lookup(ENV_ON_GATE_FAILURE) {
            self.quality.on_failure = raw.parse()?;
            info!(policy = ?self.quality.on_failure, "Gate failure policy overridden from environment");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.quality.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EtlError::Config(format!(
                "quality.threshold must be within [0.0, 1.0], got {}",
                threshold
            )));
        }

        let weights = self.quality.weights.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EtlError::Config(
                "quality.weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(EtlError::Config(
                "quality.weights must not all be zero".to_string(),
            ));
        }

        for (name, spec) in &self.fields {
            if spec.default.is_some() && spec.drop_null {
                return Err(EtlError::Config(format!(
                    "field '{}' sets both a default and drop_null",
                    name
                )));
            }
            if spec.required && spec.drop_null {
                return Err(EtlError::Config(format!(
                    "required field '{}' cannot use drop_null",
                    name
                )));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            let id = rule.id();
            if id.trim().is_empty() {
                return Err(EtlError::Config("rule id must not be empty".to_string()));
            }
            if !rule_ids.insert(id) {
                return Err(EtlError::Config(format!("duplicate rule id '{}'", id)));
            }
        }

        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(EtlError::Config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }

        if self.load.key_fields.is_empty() {
            warn!("load.key_fields is empty; every record will be treated as a new row");
        }

        Ok(())
    }
}
