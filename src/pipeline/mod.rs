// Data processing pipeline: per-source branches and the transformation core

pub mod processing;
pub mod tasks;

pub use tasks::{BranchStats, BranchTask};
