use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::domain::RawBatch;
use crate::error::Result;
use crate::pipeline::processing::clean::Cleaner;
use crate::pipeline::processing::dedup::Deduplicator;
use crate::pipeline::processing::validate::{ValidatedBatch, Validator};

/// Per-source counters from one branch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BranchStats {
    pub source: String,
    pub extracted: usize,
    pub cast_failures: usize,
    pub duplicates_removed: usize,
    pub failed_validation: usize,
}

/// The per-source chain: Cleaner -> Deduplicator -> Validator.
///
/// Holds no state between runs; clones are cheap enough to hand one to each
/// concurrently running branch.
#[derive(Clone, Default)]
pub struct BranchTask {
    cleaner: Cleaner,
    deduplicator: Deduplicator,
    validator: Validator,
}

impl BranchTask {
    pub fn new(cleaner: Cleaner, validator: Validator) -> Self {
        Self {
            cleaner,
            deduplicator: Deduplicator::new(),
            validator,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            Cleaner::new(&config.fields)?,
            Validator::from_config(&config.rules)?,
        ))
    }

    pub fn run(&self, raw: RawBatch) -> (ValidatedBatch, BranchStats) {
        let source = raw.source.clone();
        let span = tracing::info_span!("branch", source = %source);
        let _enter = span.enter();

        let batch = raw.into_batch();
        let original_count = batch.len();

        let cleaned = self.cleaner.clean(batch);
        let cast_failures = cleaned.iter().map(|r| r.cast_failures.len()).sum();

        let deduped = self.deduplicator.dedup(cleaned);
        let records = self.validator.validate(deduped.batch);
        let failed_validation = records.iter().filter(|v| !v.outcome.passed()).count();

        let stats = BranchStats {
            source,
            extracted: original_count,
            cast_failures,
            duplicates_removed: deduped.removed,
            failed_validation,
        };
        info!(
            extracted = stats.extracted,
            kept = records.len(),
            duplicates = stats.duplicates_removed,
            cast_failures = stats.cast_failures,
            failed_validation = stats.failed_validation,
            "Branch complete"
        );

        (
            ValidatedBatch {
                records,
                original_count,
                duplicates_removed: deduped.removed,
            },
            stats,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Record;
    use serde_json::json;

    fn raw(records: serde_json::Value) -> RawBatch {
        let records = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect();
        RawBatch::new("board_a", records)
    }

    #[test]
    fn test_branch_cleans_dedups_and_validates() {
        let config = PipelineConfig::from_toml_str(
            r#"
[fields.job_id]
type = "string"
required = true

[fields.openings]
type = "integer"

[[rules]]
id = "openings_positive"
kind = "range"
field = "openings"
min = 1
"#,
        )
        .unwrap();
        let task = BranchTask::from_config(&config).unwrap();

        // " 1 " and "1" become identical after trimming
        let (batch, stats) = task.run(raw(json!([
            {"job_id": " 1 ", "openings": "2"},
            {"job_id": "1", "openings": 2},
            {"job_id": "2", "openings": "0"},
            {"job_id": "3", "openings": "lots"}
        ])));

        assert_eq!(batch.original_count, 4);
        assert_eq!(batch.duplicates_removed, 1);
        assert_eq!(batch.len(), 3);
        assert_eq!(stats.cast_failures, 1);
        assert_eq!(stats.failed_validation, 1);
        assert!(batch.records[1].outcome.violations().contains("openings_positive"));
        assert!(batch.records[2].outcome.passed());
    }

    #[tokio::test]
    async fn test_panicking_rule_does_not_fail_the_branch() {
        use crate::pipeline::processing::validate::FnRule;

        let validator = Validator::default().with_rule(FnRule::new("unwraps_missing", |r: &Record| {
            let openings: Option<i64> = None;
            Ok(openings.unwrap() > r.fields.len() as i64)
        }));
        let task = BranchTask::new(Cleaner::default(), validator);

        let handle = tokio::task::spawn_blocking(move || {
            task.run(raw(json!([{"job_id": "1"}, {"job_id": "2"}])))
        });
        let (batch, stats) = handle.await.expect("branch must not panic");

        assert_eq!(batch.len(), 2);
        assert_eq!(stats.failed_validation, 2);
        assert!(batch.records.iter().all(|v| v.outcome.violations().contains("unwraps_missing")));
    }
}
