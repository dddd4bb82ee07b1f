//! Benchmark execution engine

pub mod exam;
pub mod rate_limiter;
pub mod record;
pub mod sweep;
pub mod tokens;

pub use exam::{ExamRunner, RunContext, RunError, RunSettings, RunState};
pub use rate_limiter::RateLimiter;
pub use record::{retrieval_label, RunKey, RunRecord, RunRow, SealedRun};
pub use sweep::{summarize, SummaryTable, Sweep, SweepOutcome};
pub use tokens::TokenCounter;
