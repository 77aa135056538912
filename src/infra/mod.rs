pub mod execution_log;
pub mod file_extract_adapter;
pub mod http_extract_adapter;
pub mod warehouse_adapter;

pub use execution_log::SqliteExecutionLog;
pub use file_extract_adapter::FileExtractAdapter;
pub use http_extract_adapter::HttpExtractAdapter;
pub use warehouse_adapter::{InMemoryWarehouse, NdjsonWarehouse};

use std::sync::Arc;

use crate::app::ports::{ExtractPort, LoadPort};
use crate::config::{LoadConfig, SourceConfig, SourceLocation};
use crate::domain::{is_reserved_field, RawRecord};
use crate::error::{EtlError, Result};

/// Reject field names that would collide with provenance columns
fn check_field_names(source: &str, index: usize, record: &RawRecord) -> Result<()> {
    match record.keys().find(|name| is_reserved_field(name)) {
        Some(name) => Err(EtlError::Extract {
            source_id: source.to_string(),
            message: format!("record {} uses reserved field name '{}'", index, name),
        }),
        None => Ok(()),
    }
}

/// Turn a decoded JSON document into raw records; every element must be an object
pub(crate) fn records_from_json(source: &str, value: serde_json::Value) -> Result<Vec<RawRecord>> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(obj) => {
            check_field_names(source, 0, &obj)?;
            return Ok(vec![obj]);
        }
        other => {
            return Err(EtlError::Extract {
                source_id: source.to_string(),
                message: format!("expected an array of objects, got {}", json_kind(&other)),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            serde_json::Value::Object(obj) => {
                check_field_names(source, i, &obj)?;
                Ok(obj)
            }
            other => Err(EtlError::Extract {
                source_id: source.to_string(),
                message: format!("record {} is {}, not an object", i, json_kind(&other)),
            }),
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Build one extractor per configured source
pub fn build_extractors(sources: &[SourceConfig]) -> Result<Vec<Arc<dyn ExtractPort>>> {
    sources
        .iter()
        .map(|source| -> Result<Arc<dyn ExtractPort>> {
            match &source.location {
                SourceLocation::File { path } => {
                    Ok(Arc::new(FileExtractAdapter::new(source.name.clone(), path.clone())))
                }
                SourceLocation::Http {
                    url,
                    records_pointer,
                    timeout_seconds,
                } => Ok(Arc::new(HttpExtractAdapter::new(
                    source.name.clone(),
                    url.clone(),
                    records_pointer.clone(),
                    *timeout_seconds,
                )?)),
            }
        })
        .collect()
}

/// NDJSON warehouse when an output path is configured, in-memory otherwise
pub fn build_loader(load: &LoadConfig) -> Arc<dyn LoadPort> {
    match &load.output {
        Some(path) => Arc::new(NdjsonWarehouse::new(path.clone(), load.key_fields.clone(), load.conflict)),
        None => Arc::new(InMemoryWarehouse::new(load.key_fields.clone(), load.conflict)),
    }
}
