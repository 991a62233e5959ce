pub mod diff;
pub mod keywords;
pub mod proof;
pub mod strategy;

pub use diff::{AnalysisConfig, DiffAggregator};
pub use proof::ProofVerifier;
pub use strategy::{AnalysisStrategy, LiveStrategy, SyntheticStrategy};
