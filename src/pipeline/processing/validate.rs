use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{Batch, Record};
use crate::error::{Result, RuleEvaluationError};
use crate::observability::metrics;
use crate::pipeline::processing::rules::RuleConfig;

/// A business rule: a named predicate over a record.
///
/// `Ok(true)` passes, `Ok(false)` is a violation, and an error is treated as a
/// violation of this rule.
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn evaluate(&self, record: &Record) -> std::result::Result<bool, RuleEvaluationError>;
}

/// Adapts a closure into a [`Rule`]
pub struct FnRule<F> {
    id: String,
    predicate: F,
}

impl<F> FnRule<F>
where
    F: Fn(&Record) -> std::result::Result<bool, String> + Send + Sync,
{
    pub fn new(id: impl Into<String>, predicate: F) -> Self {
        Self {
            id: id.into(),
            predicate,
        }
    }
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&Record) -> std::result::Result<bool, String> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, record: &Record) -> std::result::Result<bool, RuleEvaluationError> {
        (self.predicate)(record).map_err(|message| RuleEvaluationError {
            rule_id: self.id.clone(),
            message,
        })
    }
}

/// Evaluate a rule, turning a panicking predicate into an evaluation error
fn evaluate_isolated(rule: &dyn Rule, record: &Record) -> std::result::Result<bool, RuleEvaluationError> {
    match catch_unwind(AssertUnwindSafe(|| rule.evaluate(record))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(RuleEvaluationError {
                rule_id: rule.id().to_string(),
                message: format!("rule panicked: {}", message),
            })
        }
    }
}

/// Per-record validation result. `passed` holds iff `violations` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    passed: bool,
    violations: BTreeSet<String>,
}

impl ValidationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: BTreeSet::new(),
        }
    }

    pub fn from_violations(violations: BTreeSet<String>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Identifiers of the rules this record violated
    pub fn violations(&self) -> &BTreeSet<String> {
        &self.violations
    }
}

/// A record paired with its validation outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    pub record: Record,
    pub outcome: ValidationOutcome,
}

/// Validated records plus the dedup counts the uniqueness dimension needs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidatedBatch {
    pub records: Vec<ValidatedRecord>,
    /// Record count before any deduplication
    pub original_count: usize,
    /// Records removed as duplicates so far
    pub duplicates_removed: usize,
}

impl ValidatedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop the outcomes, keeping record order
    pub fn into_records(self) -> Batch {
        self.records.into_iter().map(|v| v.record).collect()
    }
}

/// Applies an ordered rule set to every record, collecting every violation
#[derive(Clone, Default)]
pub struct Validator {
    rules: Vec<Arc<dyn Rule>>,
}

impl Validator {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Build the rule set from configuration
    pub fn from_config(configs: &[RuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .map(|config| config.build())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn validate_record(&self, record: &Record) -> ValidationOutcome {
        let mut violations = BTreeSet::new();

        for rule in &self.rules {
            match evaluate_isolated(rule.as_ref(), record) {
                Ok(true) => {}
                Ok(false) => {
                    violations.insert(rule.id().to_string());
                }
                Err(e) => {
                    warn!(source = %record.source, "{}", e);
                    metrics::validate::rule_evaluation_error(rule.id());
                    violations.insert(rule.id().to_string());
                }
            }
        }

        ValidationOutcome::from_violations(violations)
    }

    /// Validate every record. Records are annotated, never removed.
    pub fn validate(&self, batch: Batch) -> Vec<ValidatedRecord> {
        let validated: Vec<ValidatedRecord> = batch
            .into_iter()
            .map(|record| {
                let outcome = self.validate_record(&record);
                ValidatedRecord { record, outcome }
            })
            .collect();

        let failed = validated.iter().filter(|v| !v.outcome.passed()).count();
        for v in &validated {
            for rule_id in v.outcome.violations() {
                metrics::validate::rule_violated(rule_id);
            }
        }
        metrics::validate::batch_validated(validated.len(), failed);
        debug!(
            records = validated.len(),
            failed,
            rules = self.rules.len(),
            "Validated batch"
        );

        validated
    }
}
