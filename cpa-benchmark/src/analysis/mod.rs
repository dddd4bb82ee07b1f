//! Response scoring framework

pub mod engine;
pub mod metrics;
pub mod verdict;

pub use engine::{score_rows, ScoringEngine, ScoringError};
pub use metrics::{ConfusionMatrix, MetricsRow};
pub use verdict::{extract_verdict, normalize_response, VerdictNotation};
