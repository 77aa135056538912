use std::fs;
use std::path::Path;
use std::sync::Arc;

use jobs_etl::app::transform_use_case::gate_failure;
use jobs_etl::app::{RunStatus, TransformUseCase};
use jobs_etl::config::PipelineConfig;
use jobs_etl::infra::{build_extractors, build_loader, SqliteExecutionLog};

fn write_config(dir: &Path, threshold: f64, on_failure: &str) -> PipelineConfig {
    let toml = format!(
        r#"
[quality]
threshold = {threshold}
on_failure = "{on_failure}"

[fields.job_id]
type = "string"
required = true

[fields.title]
type = "string"
required = true

[fields.salary]
type = "decimal"

[fields.posted_at]
type = "timestamp"

[[rules]]
id = "salary_non_negative"
kind = "range"
field = "salary"
min = 0

[[sources]]
name = "board_a"
kind = "file"
path = "{a}"

[[sources]]
name = "board_b"
kind = "file"
path = "{b}"

[load]
key_fields = ["job_id"]
conflict = "newest_wins"
output = "{out}"
execution_log = "{log}"
"#,
        a = dir.join("board_a.json").display(),
        b = dir.join("board_b.ndjson").display(),
        out = dir.join("warehouse").join("jobs.ndjson").display(),
        log = dir.join("runs.db").display(),
    );
    let path = dir.join("etl.toml");
    fs::write(&path, toml).unwrap();
    PipelineConfig::load(&path).unwrap()
}

fn write_sources(dir: &Path) {
    fs::write(
        dir.join("board_a.json"),
        r#"[
            {"job_id": "1", "title": " Welder ", "salary": "52000", "posted_at": "2024-04-01"},
            {"job_id": "2", "title": "Baker", "salary": 41000.5, "posted_at": "2024-04-02T08:30:00Z"},
            {"job_id": "2", "title": "Baker", "salary": "41000.5", "posted_at": "2024-04-02T08:30:00Z"}
        ]"#,
    )
    .unwrap();
    fs::write(
        dir.join("board_b.ndjson"),
        concat!(
            "{\"job_id\": \"2\", \"title\": \"Baker\", \"salary\": 41000.5, \"posted_at\": \"2024-04-02T08:30:00Z\"}\n",
            "{\"job_id\": \"3\", \"title\": \"Pilot\", \"salary\": \"-5\", \"posted_at\": \"2024-04-03\"}\n",
        ),
    )
    .unwrap();
}

fn use_case(config: &PipelineConfig) -> TransformUseCase {
    let extractors = build_extractors(&config.sources).unwrap();
    let loader = build_loader(&config.load);
    let log = SqliteExecutionLog::open(config.load.execution_log.as_ref().unwrap()).unwrap();
    TransformUseCase::new(config, extractors, loader)
        .unwrap()
        .with_execution_log(Arc::new(log))
}

#[tokio::test]
async fn test_full_run_loads_deduplicated_records() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = write_config(dir.path(), 0.5, "halt");

    let summary = use_case(&config).run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Loaded);
    let report = summary.report.as_ref().expect("report");
    assert_eq!(report.original_count, 5);
    // one in-source duplicate in board_a, one cross-source duplicate
    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.record_count, 3);
    assert_eq!(report.accuracy, 2.0 / 3.0);

    let warehouse = fs::read_to_string(config.load.output.as_ref().unwrap()).unwrap();
    assert_eq!(warehouse.lines().count(), 3);
    assert!(warehouse.contains("\"title\":\"Welder\""));

    let runs = SqliteExecutionLog::open(config.load.execution_log.as_ref().unwrap())
        .unwrap()
        .recent_runs(5)
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].records_loaded, Some(3));
}

#[tokio::test]
async fn test_failed_gate_halts_without_writing_warehouse() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = write_config(dir.path(), 0.95, "halt");

    let err = use_case(&config).run().await.unwrap_err();
    let failure = gate_failure(&err).expect("quality gate failure");
    assert!(failure.report.failing_dimension_names().contains(&"uniqueness"));
    assert!(!config.load.output.as_ref().unwrap().exists());

    let runs = SqliteExecutionLog::open(config.load.execution_log.as_ref().unwrap())
        .unwrap()
        .recent_runs(5)
        .unwrap();
    assert_eq!(runs[0].status, "halted");
}

#[tokio::test]
async fn test_score_only_leaves_warehouse_untouched() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = write_config(dir.path(), 0.95, "proceed");

    let assessment = use_case(&config).assess().await.unwrap();
    assert_eq!(assessment.branches.len(), 2);
    assert_eq!(assessment.batch.len(), 3);
    assert!(!config.load.output.as_ref().unwrap().exists());
}
