use async_trait::async_trait;
use serde::Serialize;

use crate::app::transform_use_case::RunSummary;
use crate::domain::{RawBatch, Record};
use crate::error::Result;

/// A source system that yields one raw batch per run
#[async_trait]
pub trait ExtractPort: Send + Sync {
    fn source(&self) -> &str;
    async fn extract(&self) -> Result<RawBatch>;
}

/// Upserts the final batch into the warehouse.
///
/// Implementations apply the whole batch or nothing.
#[async_trait]
pub trait LoadPort: Send + Sync {
    async fn load(&self, records: &[Record]) -> Result<LoadSummary>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

/// Durable record of each run and its quality report
#[async_trait]
pub trait ExecutionLogPort: Send + Sync {
    async fn record_run(&self, summary: &RunSummary) -> Result<()>;
}
