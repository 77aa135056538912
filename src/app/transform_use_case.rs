use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{ExecutionLogPort, ExtractPort, LoadPort, LoadSummary};
use crate::config::{GateFailurePolicy, PipelineConfig};
use crate::domain::RawBatch;
use crate::error::{EtlError, QualityGateFailure, Result};
use crate::observability::metrics;
use crate::pipeline::processing::merge::Merger;
use crate::pipeline::processing::quality_gate::{QualityReport, QualityScorer};
use crate::pipeline::processing::validate::ValidatedBatch;
use crate::pipeline::tasks::{BranchStats, BranchTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Gate passed and the batch was loaded
    Loaded,
    /// Gate failed but policy allowed the load
    LoadedDegraded,
    /// Gate failed and nothing was loaded
    Halted,
    /// Extract, branch or load error; nothing was loaded
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Loaded => "loaded",
            RunStatus::LoadedDegraded => "loaded_degraded",
            RunStatus::Halted => "halted",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything the execution log keeps about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Absent when the run failed before scoring
    pub report: Option<QualityReport>,
    pub branches: Vec<BranchStats>,
    pub load: Option<LoadSummary>,
    /// Error message of a failed run
    pub error: Option<String>,
}

/// What a run got through before it finished or failed
#[derive(Default)]
struct Progress {
    report: Option<QualityReport>,
    branches: Vec<BranchStats>,
}

/// Output of the transform half of a run, before any load
#[derive(Debug, Clone)]
pub struct Assessment {
    pub batch: ValidatedBatch,
    pub report: QualityReport,
    pub branches: Vec<BranchStats>,
}

/// Extract -> per-source branches -> merge -> quality gate -> load
pub struct TransformUseCase {
    extractors: Vec<Arc<dyn ExtractPort>>,
    branch: BranchTask,
    merger: Merger,
    scorer: QualityScorer,
    on_failure: GateFailurePolicy,
    loader: Arc<dyn LoadPort>,
    execution_log: Option<Arc<dyn ExecutionLogPort>>,
}

impl TransformUseCase {
    pub fn new(
        config: &PipelineConfig,
        extractors: Vec<Arc<dyn ExtractPort>>,
        loader: Arc<dyn LoadPort>,
    ) -> Result<Self> {
        Ok(Self {
            extractors,
            branch: BranchTask::from_config(config)?,
            merger: Merger::new(),
            scorer: QualityScorer::new(&config.fields, &config.quality)?,
            on_failure: config.quality.on_failure,
            loader,
            execution_log: None,
        })
    }

    pub fn with_execution_log(mut self, execution_log: Arc<dyn ExecutionLogPort>) -> Self {
        self.execution_log = Some(execution_log);
        self
    }

    async fn extract_all(&self) -> Result<Vec<RawBatch>> {
        let mut raw_batches = Vec::with_capacity(self.extractors.len());
        for extractor in &self.extractors {
            match extractor.extract().await {
                Ok(raw) => {
                    metrics::extract::records_extracted(&raw.source, raw.records.len());
                    info!(source = %raw.source, records = raw.records.len(), "Extracted source");
                    raw_batches.push(raw);
                }
                Err(e) => {
                    metrics::extract::extract_error(extractor.source());
                    error!(source = %extractor.source(), error = %e, "Extract failed");
                    return Err(e);
                }
            }
        }
        Ok(raw_batches)
    }

    /// Run every branch on the blocking pool and merge once all have joined.
    ///
    /// Branch results are collected in extractor order so the merge is
    /// deterministic regardless of which branch finishes first.
    pub async fn transform(&self, raw_batches: Vec<RawBatch>) -> Result<(ValidatedBatch, Vec<BranchStats>)> {
        let handles: Vec<_> = raw_batches
            .into_iter()
            .map(|raw| {
                let branch = self.branch.clone();
                let parent = tracing::Span::current();
                tokio::task::spawn_blocking(move || parent.in_scope(|| branch.run(raw)))
            })
            .collect();

        let mut batches = Vec::with_capacity(handles.len());
        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            let (batch, branch_stats) = handle.await?;
            batches.push(batch);
            stats.push(branch_stats);
        }

        Ok((self.merger.merge(batches), stats))
    }

    /// Extract, transform and score without loading
    pub async fn assess(&self) -> Result<Assessment> {
        let raw_batches = self.extract_all().await?;
        let (batch, branches) = self.transform(raw_batches).await?;
        let report = self.scorer.score(&batch);
        Ok(Assessment {
            batch,
            report,
            branches,
        })
    }

    /// Full run. A failed gate under the halt policy is returned as
    /// `EtlError::QualityGate` after the run has been logged.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(sources = self.extractors.len(), "Starting ETL run");

        let mut progress = Progress::default();
        let outcome = self.stages(&mut progress).await;

        let (status, load, error) = match &outcome {
            Ok((status, load, _)) => (*status, *load, None),
            Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
        };
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            report: progress.report,
            branches: progress.branches,
            load,
            error,
        };

        if let Some(log) = &self.execution_log {
            if let Err(e) = log.record_run(&summary).await {
                error!(error = %e, "Failed to write execution log");
            }
        }
        metrics::run::completed(status.as_str());
        info!(
            status = %status,
            score = summary.report.as_ref().map(|r| r.overall_score),
            "ETL run finished"
        );

        match outcome {
            Err(e) => Err(e),
            Ok((RunStatus::Halted, _, Some(failure))) => Err(EtlError::QualityGate(failure)),
            Ok(_) => Ok(summary),
        }
    }

    /// Extract through load. Partial results land in `progress` so a failed
    /// run can still be logged with whatever it produced.
    async fn stages(
        &self,
        progress: &mut Progress,
    ) -> Result<(RunStatus, Option<LoadSummary>, Option<QualityGateFailure>)> {
        let raw_batches = self.extract_all().await?;
        let (batch, branches) = self.transform(raw_batches).await?;
        progress.branches = branches;

        let gate_failure = match self.scorer.gate(&batch) {
            Ok(report) => {
                progress.report = Some(report);
                None
            }
            Err(failure) => {
                progress.report = Some((*failure.report).clone());
                Some(failure)
            }
        };

        if gate_failure.is_some() && self.on_failure == GateFailurePolicy::Halt {
            return Ok((RunStatus::Halted, None, gate_failure));
        }

        let records = batch.into_records();
        let summary = self.loader.load(&records).await.inspect_err(|e| {
            metrics::load::load_error();
            error!(error = %e, "Load failed");
        })?;
        metrics::load::records_loaded(summary.inserted, summary.updated, summary.skipped);

        if gate_failure.is_some() {
            warn!("Loaded batch despite failed quality gate");
            Ok((RunStatus::LoadedDegraded, Some(summary), gate_failure))
        } else {
            Ok((RunStatus::Loaded, Some(summary), None))
        }
    }
}

/// Unwrap the report from a halted run's error, if that is what it is
pub fn gate_failure(err: &EtlError) -> Option<&QualityGateFailure> {
    match err {
        EtlError::QualityGate(failure) => Some(failure),
        _ => None,
    }
}
