//! CPA Exam Benchmark Suite
//!
//! Poses Japanese CPA exam questions (audit and corporate law) to LLM answerers,
//! one sub-statement at a time, and scores the true/false verdicts against the
//! official answer key.
//!
//! # Pipeline
//!
//! - [`questions`] loads the question tables and expands each question into four
//!   prompt units with their expected verdicts
//! - [`backends`] answers a prompt, either with a single chat completion or with a
//!   tool-calling loop over the reference documents in [`retrieval`]
//! - [`runner`] drives one run per (subject, year, model, retrieval mode) and the
//!   sweep over all of them
//! - [`analysis`] extracts verdicts from the raw responses and computes
//!   confusion-matrix metrics
//! - [`reporting`] owns the on-disk result layout
//!
//! # Example
//!
//! ```no_run
//! use cpa_benchmark::{
//!     analysis::{ScoringEngine, VerdictNotation},
//!     questions::Subject,
//!     reporting::ResultLayout,
//!     runner::RunKey,
//! };
//!
//! let engine = ScoringEngine::new(ResultLayout::new("result"), VerdictNotation::Boolean);
//! let table = engine.aggregate(vec![
//!     RunKey::new(Subject::Audit, "R3", "gpt-4o-2024-05-13", false),
//!     RunKey::new(Subject::Audit, "R4_1", "gpt-4o-2024-05-13", false),
//! ]);
//! for (key, metrics) in &table {
//!     match metrics {
//!         Ok(m) => println!("{}: accuracy {:.3}", key, m.accuracy),
//!         Err(e) => println!("{}: {}", key, e),
//!     }
//! }
//! ```

pub mod analysis;
pub mod backends;
pub mod config;
pub mod providers;
pub mod questions;
pub mod reporting;
pub mod retrieval;
pub mod runner;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        extract_verdict, MetricsRow, ScoringEngine, ScoringError, VerdictNotation,
    };
    pub use crate::backends::{create_backend, AnswerBackend, BackendError, BackendResources};
    pub use crate::config::Config;
    pub use crate::providers::{
        create_api_client, create_local_client, CompletionRequest, CompletionResponse,
        LLMProvider, Message, OpenAIClient, ProviderError, ProviderResult,
    };
    pub use crate::questions::{
        expand, load_questions, ExamQuestion, QuestionSet, Subject, Verdict, ANSWER_KEY,
    };
    pub use crate::reporting::{print_console_report, ResultLayout};
    pub use crate::runner::{ExamRunner, RunError, RunKey, Sweep};
}
