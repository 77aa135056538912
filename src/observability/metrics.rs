//! Simple metrics module for the ETL pipeline
//!
//! Records through the `metrics` facade using Prometheus naming conventions.
//! Without an installed recorder every call is a no-op, so the core stays
//! usable from tests and libraries.

use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extract metrics
    ExtractRecords,
    ExtractErrors,

    // Clean metrics
    CleanRecordsProcessed,
    CleanCastFailures,
    CleanDefaultsApplied,

    // Dedup metrics
    DedupDuplicatesRemoved,

    // Validate metrics
    ValidateRecordsProcessed,
    ValidateRecordsFailed,
    ValidateRuleViolations,
    ValidateRuleErrors,

    // Merge metrics
    MergeBatchesMerged,
    MergeCrossSourceDuplicates,

    // Quality Gate metrics
    QualityGateDimensionScore,
    QualityGateOverallScore,
    QualityGatePassed,
    QualityGateFailed,

    // Load metrics
    LoadRecordsInserted,
    LoadRecordsUpdated,
    LoadRecordsSkipped,
    LoadErrors,

    // Run metrics
    RunsCompleted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractRecords => "etl_extract_records_total",
            MetricName::ExtractErrors => "etl_extract_errors_total",

            MetricName::CleanRecordsProcessed => "etl_clean_records_processed_total",
            MetricName::CleanCastFailures => "etl_clean_cast_failures_total",
            MetricName::CleanDefaultsApplied => "etl_clean_defaults_applied_total",

            MetricName::DedupDuplicatesRemoved => "etl_dedup_duplicates_removed_total",

            MetricName::ValidateRecordsProcessed => "etl_validate_records_processed_total",
            MetricName::ValidateRecordsFailed => "etl_validate_records_failed_total",
            MetricName::ValidateRuleViolations => "etl_validate_rule_violations_total",
            MetricName::ValidateRuleErrors => "etl_validate_rule_errors_total",

            MetricName::MergeBatchesMerged => "etl_merge_batches_merged_total",
            MetricName::MergeCrossSourceDuplicates => "etl_merge_cross_source_duplicates_total",

            MetricName::QualityGateDimensionScore => "etl_quality_gate_dimension_score",
            MetricName::QualityGateOverallScore => "etl_quality_gate_overall_score",
            MetricName::QualityGatePassed => "etl_quality_gate_passed_total",
            MetricName::QualityGateFailed => "etl_quality_gate_failed_total",

            MetricName::LoadRecordsInserted => "etl_load_records_inserted_total",
            MetricName::LoadRecordsUpdated => "etl_load_records_updated_total",
            MetricName::LoadRecordsSkipped => "etl_load_records_skipped_total",
            MetricName::LoadErrors => "etl_load_errors_total",

            MetricName::RunsCompleted => "etl_runs_completed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Render the current metrics in Prometheus text format, if initialized
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Extract Metrics
// ============================================================================

pub mod extract {
    use super::MetricName;

    pub fn records_extracted(source: &str, count: usize) {
        ::metrics::counter!(MetricName::ExtractRecords.as_str(), "source" => source.to_string())
            .increment(count as u64);
    }

    pub fn extract_error(source: &str) {
        ::metrics::counter!(MetricName::ExtractErrors.as_str(), "source" => source.to_string())
            .increment(1);
    }
}

// ============================================================================
// Clean Metrics
// ============================================================================

pub mod clean {
    use super::MetricName;

    pub fn batch_cleaned(records: usize) {
        ::metrics::counter!(MetricName::CleanRecordsProcessed.as_str()).increment(records as u64);
    }

    pub fn cast_failure(field: &str) {
        ::metrics::counter!(MetricName::CleanCastFailures.as_str(), "field" => field.to_string())
            .increment(1);
    }

    pub fn default_applied(field: &str) {
        ::metrics::counter!(MetricName::CleanDefaultsApplied.as_str(), "field" => field.to_string())
            .increment(1);
    }
}

// ============================================================================
// Dedup Metrics
// ============================================================================

pub mod dedup {
    use super::MetricName;

    pub fn duplicates_removed(count: usize) {
        ::metrics::counter!(MetricName::DedupDuplicatesRemoved.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Validate Metrics
// ============================================================================

pub mod validate {
    use super::MetricName;

    pub fn batch_validated(total: usize, failed: usize) {
        ::metrics::counter!(MetricName::ValidateRecordsProcessed.as_str()).increment(total as u64);
        ::metrics::counter!(MetricName::ValidateRecordsFailed.as_str()).increment(failed as u64);
    }

    pub fn rule_violated(rule_id: &str) {
        ::metrics::counter!(MetricName::ValidateRuleViolations.as_str(), "rule" => rule_id.to_string())
            .increment(1);
    }

    pub fn rule_evaluation_error(rule_id: &str) {
        ::metrics::counter!(MetricName::ValidateRuleErrors.as_str(), "rule" => rule_id.to_string())
            .increment(1);
    }
}

// ============================================================================
// Merge Metrics
// ============================================================================

pub mod merge {
    use super::MetricName;

    pub fn batches_merged(branches: usize, cross_source_duplicates: usize) {
        ::metrics::counter!(MetricName::MergeBatchesMerged.as_str()).increment(branches as u64);
        ::metrics::counter!(MetricName::MergeCrossSourceDuplicates.as_str())
            .increment(cross_source_duplicates as u64);
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;
    use crate::pipeline::processing::quality_gate::QualityReport;

    /// Record dimension scores, the overall score, and the verdict
    pub fn report_recorded(report: &QualityReport) {
        for (dimension, score) in report.dimension_scores() {
            ::metrics::gauge!(
                MetricName::QualityGateDimensionScore.as_str(),
                "dimension" => dimension.as_str()
            )
            .set(score);
        }
        ::metrics::gauge!(MetricName::QualityGateOverallScore.as_str()).set(report.overall_score);

        let verdict = if report.passed {
            MetricName::QualityGatePassed
        } else {
            MetricName::QualityGateFailed
        };
        ::metrics::counter!(verdict.as_str()).increment(1);
    }
}

// ============================================================================
// Load Metrics
// ============================================================================

pub mod load {
    use super::MetricName;

    pub fn records_loaded(inserted: usize, updated: usize, skipped: usize) {
        ::metrics::counter!(MetricName::LoadRecordsInserted.as_str()).increment(inserted as u64);
        ::metrics::counter!(MetricName::LoadRecordsUpdated.as_str()).increment(updated as u64);
        ::metrics::counter!(MetricName::LoadRecordsSkipped.as_str()).increment(skipped as u64);
    }

    pub fn load_error() {
        ::metrics::counter!(MetricName::LoadErrors.as_str()).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn completed(status: &str) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str(), "status" => status.to_string())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed_and_unique() {
        let names = [
            MetricName::ExtractRecords,
            MetricName::CleanCastFailures,
            MetricName::DedupDuplicatesRemoved,
            MetricName::ValidateRuleErrors,
            MetricName::MergeCrossSourceDuplicates,
            MetricName::QualityGateOverallScore,
            MetricName::LoadRecordsInserted,
            MetricName::RunsCompleted,
        ];
        let unique: std::collections::HashSet<_> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.as_str().starts_with("etl_")));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        clean::cast_failure("openings");
        dedup::duplicates_removed(3);
        run::completed("loaded");
    }
}
