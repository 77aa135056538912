use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::app::ports::ExecutionLogPort;
use crate::app::transform_use_case::RunSummary;
use crate::error::{EtlError, Result};

/// One row of the `etl_runs` table
#[derive(Debug, Clone, PartialEq)]
pub struct RunLogRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub overall_score: Option<f64>,
    pub passed: Option<bool>,
    pub failing_dimensions: String,
    pub records_loaded: Option<i64>,
    pub error: Option<String>,
    pub report_json: Option<String>,
}

/// Execution log table in a local SQLite database
pub struct SqliteExecutionLog {
    conn: Mutex<Connection>,
}

impl SqliteExecutionLog {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS etl_runs (
                run_id             TEXT PRIMARY KEY,
                started_at         TEXT NOT NULL,
                finished_at        TEXT NOT NULL,
                status             TEXT NOT NULL,
                overall_score      REAL,
                passed             INTEGER,
                failing_dimensions TEXT NOT NULL,
                records_loaded     INTEGER,
                error              TEXT,
                report_json        TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EtlError::Config("execution log connection lock poisoned".to_string()))
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunLogRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, started_at, finished_at, status, overall_score, passed,
                    failing_dimensions, records_loaded, error, report_json
             FROM etl_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RunLogRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                status: row.get(3)?,
                overall_score: row.get(4)?,
                passed: row.get::<_, Option<i64>>(5)?.map(|p| p != 0),
                failing_dimensions: row.get(6)?,
                records_loaded: row.get(7)?,
                error: row.get(8)?,
                report_json: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl ExecutionLogPort for SqliteExecutionLog {
    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let report = summary.report.as_ref();
        let report_json = report.map(serde_json::to_string).transpose()?;
        let failing = report
            .map(|r| r.failing_dimension_names().join(","))
            .unwrap_or_default();
        let records_loaded = summary.load.map(|l| (l.inserted + l.updated) as i64);

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO etl_runs
                (run_id, started_at, finished_at, status, overall_score, passed,
                 failing_dimensions, records_loaded, error, report_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                summary.run_id.to_string(),
                summary.started_at.to_rfc3339(),
                summary.finished_at.to_rfc3339(),
                summary.status.as_str(),
                report.map(|r| r.overall_score),
                report.map(|r| r.passed as i64),
                failing,
                records_loaded,
                summary.error,
                report_json,
            ],
        )?;
        debug!(run_id = %summary.run_id, "Execution log row written");
        Ok(())
    }
}
