use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::app::ports::{LoadPort, LoadSummary};
use crate::config::ConflictPolicy;
use crate::domain::{is_reserved_field, Record};
use crate::error::{EtlError, Result};

type Row = serde_json::Map<String, serde_json::Value>;
type Table = BTreeMap<String, Row>;

const EXTRACTED_AT_COLUMN: &str = "_extracted_at";

fn load_error(message: impl Into<String>) -> EtlError {
    EtlError::Load {
        message: message.into(),
    }
}

/// Key-based upsert shared by the warehouse backends
#[derive(Debug, Clone)]
struct Upsert {
    key_fields: Vec<String>,
    conflict: ConflictPolicy,
}

impl Upsert {
    /// Natural key from the configured columns, or the full data payload when none are set
    fn key_of(&self, row: &Row) -> Result<String> {
        if self.key_fields.is_empty() {
            let data: BTreeMap<&String, &serde_json::Value> =
                row.iter().filter(|(column, _)| !is_reserved_field(column)).collect();
            return Ok(serde_json::to_string(&data)?);
        }

        let mut parts = Vec::with_capacity(self.key_fields.len());
        for field in &self.key_fields {
            match row.get(field) {
                Some(value) if !value.is_null() => parts.push(value),
                _ => return Err(load_error(format!("record has no value for key field '{}'", field))),
            }
        }
        Ok(serde_json::to_string(&parts)?)
    }

    fn extracted_at(row: &Row) -> Option<DateTime<Utc>> {
        row.get(EXTRACTED_AT_COLUMN)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    fn same_data(a: &Row, b: &Row) -> bool {
        let data = |row: &Row| -> BTreeMap<String, serde_json::Value> {
            row.iter()
                .filter(|(column, _)| !is_reserved_field(column))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        data(a) == data(b)
    }

    fn replaces(&self, stored: &Row, incoming: &Row) -> bool {
        match self.conflict {
            ConflictPolicy::LastWriteWins => true,
            ConflictPolicy::FirstWriteWins => false,
            ConflictPolicy::NewestWins => match (Self::extracted_at(stored), Self::extracted_at(incoming)) {
                (Some(stored_at), Some(incoming_at)) => incoming_at >= stored_at,
                _ => true,
            },
        }
    }

    /// Apply every record to a staged copy; the caller commits only on success
    fn apply(&self, table: &Table, records: &[Record]) -> Result<(Table, LoadSummary)> {
        let mut staged = table.clone();
        let mut summary = LoadSummary::default();

        for record in records {
            let row = match record.to_json() {
                serde_json::Value::Object(row) => row,
                _ => return Err(load_error("record did not serialize to an object")),
            };
            let key = self.key_of(&row)?;

            match staged.get(&key) {
                None => {
                    staged.insert(key, row);
                    summary.inserted += 1;
                }
                Some(stored) if self.replaces(stored, &row) && !Self::same_data(stored, &row) => {
                    staged.insert(key, row);
                    summary.updated += 1;
                }
                Some(_) => summary.skipped += 1,
            }
        }
        Ok((staged, summary))
    }
}

/// Process-local warehouse table
pub struct InMemoryWarehouse {
    upsert: Upsert,
    table: Mutex<Table>,
}

impl InMemoryWarehouse {
    pub fn new(key_fields: Vec<String>, conflict: ConflictPolicy) -> Self {
        Self {
            upsert: Upsert { key_fields, conflict },
            table: Mutex::new(Table::new()),
        }
    }

    /// Current rows in key order
    pub fn rows(&self) -> Vec<serde_json::Value> {
        match self.table.lock() {
            Ok(table) => table.values().cloned().map(serde_json::Value::Object).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LoadPort for InMemoryWarehouse {
    async fn load(&self, records: &[Record]) -> Result<LoadSummary> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| load_error("warehouse table lock poisoned"))?;
        let (staged, summary) = self.upsert.apply(&table, records)?;
        *table = staged;
        debug!(rows = table.len(), "In-memory load committed");
        Ok(summary)
    }
}

/// Warehouse table persisted as one JSON object per line.
///
/// Each load rewrites the file through a temporary sibling and a rename, so a
/// failed load leaves the previous contents in place.
pub struct NdjsonWarehouse {
    upsert: Upsert,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl NdjsonWarehouse {
    pub fn new(path: impl Into<PathBuf>, key_fields: Vec<String>, conflict: ConflictPolicy) -> Self {
        Self {
            upsert: Upsert { key_fields, conflict },
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<Table> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Table::new()),
            Err(e) => return Err(e.into()),
        };

        let mut table = Table::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: Row = serde_json::from_str(line).map_err(|e| {
                load_error(format!("{}:{}: {}", self.path.display(), line_no + 1, e))
            })?;
            table.insert(self.upsert.key_of(&row)?, row);
        }
        Ok(table)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "warehouse.ndjson".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    async fn write_table(&self, table: &Table) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = String::new();
        for row in table.values() {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl LoadPort for NdjsonWarehouse {
    async fn load(&self, records: &[Record]) -> Result<LoadSummary> {
        let _guard = self.write_lock.lock().await;
        let table = self.read_table().await?;
        let (staged, summary) = self.upsert.apply(&table, records)?;
        self.write_table(&staged).await?;
        info!(
            path = %self.path.display(),
            rows = staged.len(),
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "Warehouse file written"
        );
        Ok(summary)
    }
}
