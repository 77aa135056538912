use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::app::ports::ExtractPort;
use crate::domain::{RawBatch, RawRecord};
use crate::error::{EtlError, Result};
use crate::infra::records_from_json;

/// Reads a JSON array or newline-delimited JSON file
pub struct FileExtractAdapter {
    source: String,
    path: PathBuf,
}

impl FileExtractAdapter {
    pub fn new(source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
        }
    }

    fn parse(&self, content: &str) -> Result<Vec<RawRecord>> {
        let trimmed = content.trim_start();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if trimmed.starts_with('[') {
            return records_from_json(&self.source, serde_json::from_str(trimmed)?);
        }

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(line).map_err(|e| EtlError::Extract {
                source_id: self.source.clone(),
                message: format!("{}:{}: {}", self.path.display(), line_no + 1, e),
            })?;
            records.extend(records_from_json(&self.source, value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl ExtractPort for FileExtractAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    async fn extract(&self) -> Result<RawBatch> {
        debug!(source = %self.source, path = %self.path.display(), "Reading source file");
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EtlError::Extract {
                source_id: self.source.clone(),
                message: format!("failed to read {}: {}", self.path.display(), e),
            })?;
        Ok(RawBatch::new(self.source.clone(), self.parse(&content)?))
    }
}
