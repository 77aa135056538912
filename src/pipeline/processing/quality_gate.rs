use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::config::{DimensionWeights, FieldSpec, QualityConfig};
use crate::domain::{FieldType, Record};
use crate::error::{EtlError, QualityGateFailure, Result};
use crate::observability::metrics;
use crate::pipeline::processing::validate::{ValidatedBatch, ValidatedRecord};

/// Scores within this distance count as tied when picking the lowest dimensions
const SCORE_EPSILON: f64 = 1e-9;

/// The four independently scored quality dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    /// Records with no null required fields
    Completeness,
    /// Records with zero rule violations
    Accuracy,
    /// Records whose field types match the declared schema
    Consistency,
    /// Records not removed as duplicates
    Uniqueness,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 4] = [
        QualityDimension::Completeness,
        QualityDimension::Accuracy,
        QualityDimension::Consistency,
        QualityDimension::Uniqueness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDimension::Completeness => "completeness",
            QualityDimension::Accuracy => "accuracy",
            QualityDimension::Consistency => "consistency",
            QualityDimension::Uniqueness => "uniqueness",
        }
    }
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Batch-level quality assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub uniqueness: f64,
    /// Weighted mean of the four dimensions
    pub overall_score: f64,
    pub threshold: f64,
    pub weights: DimensionWeights,
    /// `overall_score >= threshold`
    pub passed: bool,
    /// Dimensions scoring under the per-dimension floor (the threshold)
    pub below_floor: Vec<QualityDimension>,
    /// Dimensions blamed for a failed gate; empty when the gate passed
    pub failing_dimensions: Vec<QualityDimension>,
    /// Records scored (after deduplication)
    pub record_count: usize,
    /// Records seen before deduplication
    pub original_count: usize,
    pub duplicates_removed: usize,
    pub assessed_at: DateTime<Utc>,
}

impl QualityReport {
    pub fn score(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::Completeness => self.completeness,
            QualityDimension::Accuracy => self.accuracy,
            QualityDimension::Consistency => self.consistency,
            QualityDimension::Uniqueness => self.uniqueness,
        }
    }

    pub fn dimension_scores(&self) -> [(QualityDimension, f64); 4] {
        QualityDimension::ALL.map(|d| (d, self.score(d)))
    }

    /// The dimension(s) tied for the lowest score
    pub fn lowest_dimensions(&self) -> Vec<QualityDimension> {
        let min = self
            .dimension_scores()
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::INFINITY, f64::min);
        QualityDimension::ALL
            .into_iter()
            .filter(|d| (self.score(*d) - min).abs() <= SCORE_EPSILON)
            .collect()
    }

    pub fn failing_dimension_names(&self) -> Vec<&'static str> {
        self.failing_dimensions.iter().map(|d| d.as_str()).collect()
    }

    /// One-line description for logs and error messages
    pub fn summary(&self) -> String {
        let scores = self
            .dimension_scores()
            .iter()
            .map(|(d, s)| format!("{}={:.3}", d, s))
            .collect::<Vec<_>>()
            .join(" ");
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        if self.failing_dimensions.is_empty() {
            format!(
                "{} overall={:.3} threshold={:.3} [{}]",
                verdict, self.overall_score, self.threshold, scores
            )
        } else {
            format!(
                "{} overall={:.3} threshold={:.3} [{}] failing: {}",
                verdict,
                self.overall_score,
                self.threshold,
                scores,
                self.failing_dimension_names().join(", ")
            )
        }
    }
}

/// Aggregates per-record outcomes into a [`QualityReport`] and applies the gate.
///
/// The scorer never modifies or drops records.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    required_fields: Vec<String>,
    declared_types: BTreeMap<String, FieldType>,
    threshold: f64,
    weights: DimensionWeights,
}

impl QualityScorer {
    pub fn new(schema: &BTreeMap<String, FieldSpec>, quality: &QualityConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&quality.threshold) {
            return Err(EtlError::Config(format!(
                "quality threshold must be within [0.0, 1.0], got {}",
                quality.threshold
            )));
        }
        let weights = quality.weights.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(EtlError::Config(
                "quality weights must be non-negative with a positive sum".to_string(),
            ));
        }

        Ok(Self {
            required_fields: schema
                .iter()
                .filter(|(_, spec)| spec.required)
                .map(|(name, _)| name.clone())
                .collect(),
            declared_types: schema
                .iter()
                .map(|(name, spec)| (name.clone(), spec.field_type))
                .collect(),
            threshold: quality.threshold,
            weights: quality.weights,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_complete(&self, record: &Record) -> bool {
        self.required_fields.iter().all(|f| !record.is_null(f))
    }

    fn is_consistent(&self, record: &Record) -> bool {
        record.cast_failures.is_empty()
            && self.declared_types.iter().all(|(name, declared)| {
                match record.get(name).field_type() {
                    None => true,
                    Some(actual) => actual == *declared,
                }
            })
    }

    fn fraction<F>(records: &[ValidatedRecord], predicate: F) -> f64
    where
        F: Fn(&ValidatedRecord) -> bool,
    {
        if records.is_empty() {
            return 1.0;
        }
        let hits = records.iter().filter(|r| predicate(r)).count();
        hits as f64 / records.len() as f64
    }

    pub fn score(&self, batch: &ValidatedBatch) -> QualityReport {
        let records = &batch.records;
        if records.is_empty() {
            warn!("Scoring an empty batch; record-level dimensions default to 1.0");
        }

        let completeness = Self::fraction(records, |r| self.is_complete(&r.record));
        let accuracy = Self::fraction(records, |r| r.outcome.passed());
        let consistency = Self::fraction(records, |r| self.is_consistent(&r.record));
        let uniqueness = if batch.original_count == 0 {
            1.0
        } else {
            (1.0 - batch.duplicates_removed as f64 / batch.original_count as f64).clamp(0.0, 1.0)
        };

        let scores = [completeness, accuracy, consistency, uniqueness];
        let weights = self.weights.as_array();
        let weighted: f64 = scores.iter().zip(weights.iter()).map(|(s, w)| s * w).sum();
        let overall_score = (weighted / weights.iter().sum::<f64>()).clamp(0.0, 1.0);
        let passed = overall_score >= self.threshold;

        let below_floor: Vec<QualityDimension> = QualityDimension::ALL
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score < self.threshold)
            .map(|(d, _)| d)
            .collect();

        let mut report = QualityReport {
            completeness,
            accuracy,
            consistency,
            uniqueness,
            overall_score,
            threshold: self.threshold,
            weights: self.weights,
            passed,
            below_floor: below_floor.clone(),
            failing_dimensions: Vec::new(),
            record_count: records.len(),
            original_count: batch.original_count,
            duplicates_removed: batch.duplicates_removed,
            assessed_at: Utc::now(),
        };

        if !passed {
            report.failing_dimensions = if below_floor.is_empty() {
                report.lowest_dimensions()
            } else {
                below_floor
            };
        }

        metrics::quality_gate::report_recorded(&report);
        info!(report = %report.summary(), "Quality report computed");
        report
    }

    /// Score the batch and fail with the full report if it is under threshold
    pub fn gate(&self, batch: &ValidatedBatch) -> std::result::Result<QualityReport, QualityGateFailure> {
        let report = self.score(batch);
        if report.passed {
            Ok(report)
        } else {
            warn!(
                failing = ?report.failing_dimension_names(),
                "Quality gate failed"
            );
            Err(QualityGateFailure {
                report: Box::new(report),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::validate::ValidationOutcome;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn schema() -> BTreeMap<String, FieldSpec> {
        let mut schema = BTreeMap::new();
        schema.insert("job_id".to_string(), FieldSpec::new(FieldType::String).required());
        schema.insert("title".to_string(), FieldSpec::new(FieldType::String).required());
        schema.insert(
            "openings".to_string(),
            FieldSpec::new(FieldType::Integer).with_default(json!(1)),
        );
        schema
    }

    fn scorer(threshold: f64) -> QualityScorer {
        let quality = QualityConfig {
            threshold,
            ..QualityConfig::default()
        };
        QualityScorer::new(&schema(), &quality).unwrap()
    }

    fn good(id: &str) -> ValidatedRecord {
        ValidatedRecord {
            record: Record::new("board_a", Utc::now())
                .with("job_id", id)
                .with("title", "Chef")
                .with("openings", 2i64),
            outcome: ValidationOutcome::pass(),
        }
    }

    fn violating(id: &str) -> ValidatedRecord {
        let mut record = good(id);
        let mut violations = BTreeSet::new();
        violations.insert("some_rule".to_string());
        record.outcome = ValidationOutcome::from_violations(violations);
        record
    }

    fn batch(records: Vec<ValidatedRecord>, original_count: usize) -> ValidatedBatch {
        let duplicates_removed = original_count - records.len();
        ValidatedBatch {
            records,
            original_count,
            duplicates_removed,
        }
    }

    #[test]
    fn test_perfect_batch_passes() {
        let report = scorer(0.95).score(&batch(vec![good("1"), good("2")], 2));
        assert_eq!(report.overall_score, 1.0);
        assert!(report.passed);
        assert!(report.failing_dimensions.is_empty());
    }

    #[test]
    fn test_uniqueness_from_dedup_counts() {
        let report = scorer(0.95).score(&batch(vec![good("1"), good("2")], 3));
        assert!((report.uniqueness - (1.0 - 1.0 / 3.0)).abs() < 1e-9);
        assert!((report.overall_score - (3.0 + 2.0 / 3.0) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_null_required_field_lowers_completeness() {
        let mut incomplete = good("2");
        incomplete.record.set("title", crate::domain::Value::Null);
        let records = vec![good("1"), incomplete, good("3"), good("4")];

        let report = scorer(0.95).score(&batch(records, 4));
        assert_eq!(report.completeness, 0.75);
        assert!((report.overall_score - 3.75 / 4.0).abs() < 1e-9);
        assert_eq!(report.below_floor, vec![QualityDimension::Completeness]);
    }

    #[test]
    fn test_failing_gate_names_weak_dimensions() {
        let mut records: Vec<ValidatedRecord> = (0..10).map(|i| good(&i.to_string())).collect();
        records[0] = violating("0");
        records[1] = violating("1");
        records[2] = violating("2");

        let failure = scorer(0.95).gate(&batch(records, 10)).unwrap_err();
        let report = failure.report;
        assert!(!report.passed);
        assert!(report.overall_score < 0.95);
        assert_eq!(report.failing_dimensions, vec![QualityDimension::Accuracy]);
        assert!(report.summary().contains("accuracy"));
    }

    #[test]
    fn test_scenario_threshold_095_overall_092() {
        // accuracy 0.68, everything else perfect: (0.68 + 3) / 4 = 0.92
        let mut records: Vec<ValidatedRecord> = (0..25).map(|i| good(&i.to_string())).collect();
        for (i, record) in records.iter_mut().enumerate().take(8) {
            *record = violating(&i.to_string());
        }

        let failure = scorer(0.95).gate(&batch(records, 25)).unwrap_err();
        assert!((failure.report.overall_score - 0.92).abs() < 1e-9);
        assert_eq!(failure.report.failing_dimension_names(), vec!["accuracy"]);
        assert_eq!(failure.report.lowest_dimensions(), vec![QualityDimension::Accuracy]);
    }

    #[test]
    fn test_empty_rule_outcomes_are_fully_accurate() {
        let report = scorer(0.95).score(&batch(vec![good("1"), good("2")], 2));
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn test_cast_failure_or_type_mismatch_breaks_consistency() {
        let mut cast_failed = good("2");
        cast_failed.record.cast_failures.push(crate::error::FieldCastError {
            field: "openings".to_string(),
            expected: FieldType::Integer,
            raw: "many".to_string(),
        });
        let mut mistyped = good("3");
        mistyped.record.set("openings", "two".into());

        let report = scorer(0.5).score(&batch(vec![good("1"), cast_failed, mistyped, good("4")], 4));
        assert_eq!(report.consistency, 0.5);
    }

    #[test]
    fn test_empty_batch_scores_one() {
        let report = scorer(0.95).score(&ValidatedBatch::default());
        for (_, score) in report.dimension_scores() {
            assert_eq!(score, 1.0);
        }
        assert!(report.passed);
    }

    #[test]
    fn test_weights_shift_overall() {
        let quality = QualityConfig {
            threshold: 0.5,
            weights: DimensionWeights {
                completeness: 0.0,
                accuracy: 1.0,
                consistency: 0.0,
                uniqueness: 0.0,
            },
            ..QualityConfig::default()
        };
        let scorer = QualityScorer::new(&schema(), &quality).unwrap();
        let report = scorer.score(&batch(vec![good("1"), violating("2")], 2));
        assert_eq!(report.overall_score, 0.5);
        assert!(report.passed);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let records = vec![violating("1"), violating("2")];
        let report = scorer(1.0).score(&batch(records, 50));
        for (_, score) in report.dimension_scores() {
            assert!((0.0..=1.0).contains(&score));
        }
        assert!((0.0..=1.0).contains(&report.overall_score));
    }

    #[test]
    fn test_rejects_invalid_threshold() {
        let quality = QualityConfig {
            threshold: -0.1,
            ..QualityConfig::default()
        };
        assert!(QualityScorer::new(&schema(), &quality).is_err());
    }
}
