// Transformation core: cleaning, deduplication, validation, scoring, and merging

pub mod clean;
pub mod dedup;
pub mod merge;
pub mod quality_gate;
pub mod rules;
pub mod validate;

pub use clean::Cleaner;
pub use dedup::{Deduplicator, Fingerprint};
pub use merge::Merger;
pub use quality_gate::{QualityDimension, QualityReport, QualityScorer};
pub use validate::{FnRule, Rule, ValidatedBatch, ValidatedRecord, ValidationOutcome, Validator};
