use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::domain::{Batch, Record, Value};
use crate::observability::metrics;

/// Canonical identity of a record's field data, hex-encoded SHA-256.
///
/// Provenance (`source`, `extracted_at`) and cast diagnostics are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(record: &Record) -> Self {
        let mut hasher = Sha256::new();
        // BTreeMap iteration gives the canonical field order
        for (name, value) in &record.fields {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            encode_value(&mut hasher, value);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn encode_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Integer(i) => {
            hasher.update(b"i");
            hasher.update(i.to_le_bytes());
        }
        Value::Decimal(d) => {
            // 0.0 == -0.0, so they must hash alike
            let d = if *d == 0.0 { 0.0f64 } else { *d };
            hasher.update(b"d");
            hasher.update(d.to_bits().to_le_bytes());
        }
        Value::Timestamp(ts) => {
            let text = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
            hasher.update(b"t");
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
    }
}

/// Keep the first item per key, in input order. Returns the kept items and
/// the number removed.
pub fn dedup_by_fingerprint<T, F>(items: Vec<T>, fingerprint: F) -> (Vec<T>, usize)
where
    F: Fn(&T) -> Fingerprint,
{
    let input = items.len();
    let mut seen = HashSet::with_capacity(input);
    let kept: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(fingerprint(item)))
        .collect();
    let removed = input - kept.len();
    (kept, removed)
}

/// Result of deduplicating a batch
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub batch: Batch,
    pub removed: usize,
}

/// Exact-duplicate removal over record fingerprints
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn dedup(&self, batch: Batch) -> DedupOutcome {
        let input = batch.len();
        let (batch, removed) = dedup_by_fingerprint(batch, Fingerprint::of);

        metrics::dedup::duplicates_removed(removed);
        debug!(input, kept = batch.len(), removed, "Deduplicated batch");

        DedupOutcome { batch, removed }
    }
}
