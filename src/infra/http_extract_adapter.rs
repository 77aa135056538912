use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::app::ports::ExtractPort;
use crate::domain::{RawBatch, RawRecord};
use crate::error::{EtlError, Result};
use crate::infra::records_from_json;

/// Fetches a JSON document over HTTP and pulls records out of it
pub struct HttpExtractAdapter {
    source: String,
    url: String,
    records_pointer: Option<String>,
    client: reqwest::Client,
}

impl HttpExtractAdapter {
    pub fn new(
        source: impl Into<String>,
        url: impl Into<String>,
        records_pointer: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("jobs_etl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            source: source.into(),
            url: url.into(),
            records_pointer,
            client,
        })
    }
}

/// Resolve the optional JSON pointer and decode the records it points at
pub(crate) fn select_records(
    source: &str,
    mut document: serde_json::Value,
    pointer: Option<&str>,
) -> Result<Vec<RawRecord>> {
    let selected = match pointer {
        Some(pointer) => document
            .pointer_mut(pointer)
            .map(serde_json::Value::take)
            .ok_or_else(|| EtlError::Extract {
                source_id: source.to_string(),
                message: format!("records pointer '{}' not found in response", pointer),
            })?,
        None => document,
    };
    records_from_json(source, selected)
}

#[async_trait]
impl ExtractPort for HttpExtractAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    async fn extract(&self) -> Result<RawBatch> {
        debug!(source = %self.source, url = %self.url, "Fetching source");
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let document: serde_json::Value = response.json().await?;
        let records = select_records(&self.source, document, self.records_pointer.as_deref())?;
        Ok(RawBatch::new(self.source.clone(), records))
    }
}
