use tracing::info;

use crate::observability::metrics;
use crate::pipeline::processing::dedup::{dedup_by_fingerprint, Fingerprint};
use crate::pipeline::processing::validate::ValidatedBatch;

/// Joins per-source branches into one batch and removes cross-source duplicates
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger;

impl Merger {
    pub fn new() -> Self {
        Self
    }

    /// Concatenate in argument order, then keep the first record per fingerprint.
    ///
    /// Counts are summed so the uniqueness dimension still sees the original
    /// pre-dedup total; cross-source removals are added to `duplicates_removed`.
    pub fn merge(&self, batches: Vec<ValidatedBatch>) -> ValidatedBatch {
        let branch_count = batches.len();
        let mut original_count = 0;
        let mut duplicates_removed = 0;
        let mut combined = Vec::with_capacity(batches.iter().map(|b| b.len()).sum());

        for batch in batches {
            original_count += batch.original_count;
            duplicates_removed += batch.duplicates_removed;
            combined.extend(batch.records);
        }

        let (records, cross_source) = dedup_by_fingerprint(combined, |v| Fingerprint::of(&v.record));
        duplicates_removed += cross_source;

        metrics::merge::batches_merged(branch_count, cross_source);
        info!(
            branches = branch_count,
            records = records.len(),
            cross_source_duplicates = cross_source,
            "Merged source batches"
        );

        ValidatedBatch {
            records,
            original_count,
            duplicates_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Record;
    use crate::pipeline::processing::validate::{ValidatedRecord, ValidationOutcome};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn validated(source: &str, id: &str) -> ValidatedRecord {
        ValidatedRecord {
            record: Record::new(source, Utc::now()).with("job_id", id),
            outcome: ValidationOutcome::pass(),
        }
    }

    fn branch(source: &str, ids: &[&str], original_count: usize) -> ValidatedBatch {
        ValidatedBatch {
            records: ids.iter().map(|id| validated(source, id)).collect(),
            original_count,
            duplicates_removed: original_count - ids.len(),
        }
    }

    fn fingerprints(batch: &ValidatedBatch) -> BTreeSet<Fingerprint> {
        batch.records.iter().map(|v| Fingerprint::of(&v.record)).collect()
    }

    #[test]
    fn test_removes_exactly_one_cross_source_duplicate() {
        let a = branch("board_a", &["1", "2", "3"], 3);
        let b = branch("board_b", &["3", "4"], 2);

        let merged = Merger::new().merge(vec![a, b]);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.original_count, 5);
        assert_eq!(merged.duplicates_removed, 1);
        // first-seen wins: record "3" comes from board_a
        assert_eq!(merged.records[2].record.source, "board_a");
    }

    #[test]
    fn test_carries_branch_dedup_counts() {
        let a = branch("board_a", &["1", "2"], 4);
        let b = branch("board_b", &["9"], 1);

        let merged = Merger::new().merge(vec![a, b]);
        assert_eq!(merged.original_count, 5);
        assert_eq!(merged.duplicates_removed, 2);
    }

    #[test]
    fn test_merge_is_commutative_over_fingerprints() {
        let a = branch("board_a", &["1", "2", "3"], 3);
        let b = branch("board_b", &["2", "5"], 2);

        let ab = Merger::new().merge(vec![a.clone(), b.clone()]);
        let ba = Merger::new().merge(vec![b, a]);
        assert_eq!(fingerprints(&ab), fingerprints(&ba));
        assert_eq!(ab.len(), ba.len());
    }

    #[test]
    fn test_output_never_exceeds_inputs() {
        let a = branch("board_a", &["1", "1b"], 2);
        let b = branch("board_b", &["2"], 1);
        let c = branch("board_c", &["1", "2", "3"], 3);
        let merged = Merger::new().merge(vec![a, b, c]);
        assert!(merged.len() <= 6);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_no_batches_yields_empty() {
        let merged = Merger::new().merge(Vec::new());
        assert!(merged.is_empty());
        assert_eq!(merged.original_count, 0);
    }
}
