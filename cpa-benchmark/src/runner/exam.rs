//! One sweep cell: answer every sub-statement of one (subject, year) with one model

use chrono::Local;
use std::time::Duration;

use super::record::{RunKey, RunRecord, SealedRun};
use super::tokens::TokenCounter;
use crate::backends::{create_backend, AnswerBackend, BackendError, BackendResources, BackendSettings};
use crate::providers::ProviderError;
use crate::questions::{expand_with_layout, ExamQuestion, LoadError, QuestionLayout, QuestionSet, Subject};
use crate::reporting::{remove_stale_rows, write_rows, ReportError, ResultLayout, TranscriptWriter};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Loading,
    Answering,
    Finalized,
    /// Stopped before its rows were persisted
    Aborted,
}

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("No data for {subject} {year}. Please make sure you specified the right year.")]
    NoData { subject: Subject, year: String },

    #[error("Run {key} aborted: {reason}")]
    Aborted { key: RunKey, reason: String },

    #[error("Run {0} was already started")]
    AlreadyStarted(RunKey),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Question load error: {0}")]
    Load(#[from] LoadError),
}

impl RunError {
    /// Whether the failure must stop the whole sweep, not just this run
    pub fn aborts_sweep(&self) -> bool {
        matches!(self, RunError::Aborted { .. })
    }
}

impl From<ReportError> for RunError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Io(e) => RunError::Io(e),
            ReportError::Csv(e) => RunError::Csv(e),
        }
    }
}

/// Prompt framing and limits applied to every unit of a run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub pre_question: String,
    pub post_question: String,
    pub layout: QuestionLayout,
    pub timeout: Duration,
}

impl RunSettings {
    /// `pre + unit text + "\n" + post`
    pub fn compose(&self, unit_text: &str) -> String {
        format!("{}{}\n{}", self.pre_question, unit_text, self.post_question)
    }
}

/// Everything a run reads but does not own
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub questions: &'a QuestionSet,
    pub resources: &'a BackendResources,
    pub backend: &'a BackendSettings,
    pub settings: &'a RunSettings,
    pub results: &'a ResultLayout,
    pub is_api_model: bool,
}

pub struct ExamRunner<'a> {
    key: RunKey,
    ctx: RunContext<'a>,
    state: RunState,
}

impl<'a> ExamRunner<'a> {
    pub fn new(key: RunKey, ctx: RunContext<'a>) -> Self {
        Self {
            key,
            ctx,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!("{}: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
    }

    /// Answer every unit in source order, then persist the rows and close the transcript.
    ///
    /// Any exit short of `Finalized` removes the rows file for the key, so a summary never
    /// scores results left over from an earlier sweep.
    pub async fn run(&mut self) -> Result<SealedRun, RunError> {
        if self.state != RunState::Init {
            return Err(RunError::AlreadyStarted(self.key.clone()));
        }

        self.transition(RunState::Loading);
        let question_set = self.ctx.questions;
        let questions: Vec<&ExamQuestion> = question_set.for_year(&self.key.year).collect();
        if questions.is_empty() {
            self.discard_stale_rows();
            self.transition(RunState::Aborted);
            return Err(RunError::NoData {
                subject: self.key.subject,
                year: self.key.year.clone(),
            });
        }

        let mut transcript = match self.open_transcript(questions.len()) {
            Ok(transcript) => transcript,
            Err(e) => {
                self.discard_stale_rows();
                self.transition(RunState::Aborted);
                return Err(e);
            }
        };

        match self.answer_all(&questions, &mut transcript).await {
            Ok(sealed) => {
                if let Err(e) = transcript.finish(sealed.total_tokens()) {
                    self.discard_stale_rows();
                    self.transition(RunState::Aborted);
                    return Err(e.into());
                }
                self.transition(RunState::Finalized);
                tracing::info!(
                    "Finish the inference for {}! {} rows, {} tokens",
                    self.key,
                    sealed.rows().len(),
                    sealed.total_tokens()
                );
                Ok(sealed)
            }
            Err(e) => {
                tracing::error!("{}: {}", self.key, e);
                if let Err(log_err) = transcript.aborted(&e.to_string()) {
                    tracing::warn!("Could not mark transcript of {} as aborted: {}", self.key, log_err);
                }
                self.discard_stale_rows();
                self.transition(RunState::Aborted);
                Err(e)
            }
        }
    }

    fn open_transcript(&self, question_count: usize) -> Result<TranscriptWriter, RunError> {
        self.ctx.results.ensure_dirs()?;
        let mut transcript = TranscriptWriter::create(&self.ctx.results.transcript_path(&self.key))?;
        transcript.header(&self.key, question_count, Local::now())?;
        Ok(transcript)
    }

    async fn answer_all(
        &mut self,
        questions: &[&ExamQuestion],
        transcript: &mut TranscriptWriter,
    ) -> Result<SealedRun, RunError> {
        let backend = create_backend(
            &self.key.model,
            self.ctx.is_api_model,
            self.key.retrieval,
            self.ctx.resources,
            self.ctx.backend,
        )?;
        let tokens = if self.ctx.is_api_model {
            TokenCounter::for_model(&self.key.model)
        } else {
            TokenCounter::disabled()
        };

        tracing::info!("Start the inference for {}...", self.key);
        self.transition(RunState::Answering);
        let mut record = RunRecord::new(self.key.clone());

        for (i, question) in questions.iter().enumerate() {
            tracing::info!("start question:{}...", i);
            transcript.question(i)?;

            let units = match expand_with_layout(question, self.ctx.settings.layout) {
                Ok(units) => units,
                Err(e) => {
                    tracing::warn!("Skipping question {} of {}: {}", i, self.key, e);
                    transcript.skipped_question(&e.to_string())?;
                    continue;
                }
            };

            for unit in units {
                let query = self.ctx.settings.compose(&unit.text);
                transcript.query(&query)?;

                match self.answer(&backend, &query).await {
                    Ok(response) => {
                        record.add_tokens(tokens.count(&query));
                        transcript.answered(&response, unit.expected)?;
                        record.append(response, unit.expected);
                    }
                    Err(e) if e.is_not_implemented() => {
                        return Err(RunError::Aborted {
                            key: self.key.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        let error = e.to_string();
                        tracing::warn!("{} question {} slot {:?}: {}", self.key, i, unit.slot, error);
                        transcript.failed(&error)?;
                        record.append(error, unit.expected);
                    }
                }
            }
        }

        let sealed = record.seal();
        write_rows(&self.ctx.results.rows_path(&self.key), sealed.rows())?;
        Ok(sealed)
    }

    /// Drop the rows file of this key; failures here are logged, not returned
    fn discard_stale_rows(&self) {
        match remove_stale_rows(&self.ctx.results.rows_path(&self.key)) {
            Ok(true) => tracing::warn!("Removed stale results for {}", self.key),
            Ok(false) => {}
            Err(e) => tracing::error!("Could not remove stale results for {}: {}", self.key, e),
        }
    }

    async fn answer(&self, backend: &AnswerBackend, query: &str) -> Result<String, BackendError> {
        let timeout = self.ctx.settings.timeout;
        match tokio::time::timeout(timeout, backend.answer(query)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Transport(ProviderError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedProvider;
    use crate::providers::LLMProvider;
    use crate::questions::fixtures::question;
    use crate::questions::Verdict;
    use std::fs;
    use std::sync::Arc;

    fn question_set(answers: &[(&str, &str)]) -> QuestionSet {
        QuestionSet {
            subject: Subject::Audit,
            questions: answers.iter().map(|(y, a)| question(Subject::Audit, y, a)).collect(),
            excluded: 0,
        }
    }

    fn backend_settings() -> BackendSettings {
        BackendSettings {
            system_prompt: "TrueかFalseで答えよ。".to_string(),
            max_tokens: 500,
            max_tool_rounds: 4,
        }
    }

    fn run_settings(timeout: Duration) -> RunSettings {
        RunSettings {
            pre_question: "問題:\n".to_string(),
            post_question: "回答:".to_string(),
            layout: QuestionLayout::FixedKey,
            timeout,
        }
    }

    fn resources(local: ScriptedProvider, api: Option<ScriptedProvider>) -> BackendResources {
        BackendResources {
            api: api.map(|p| Arc::new(p) as Arc<dyn LLMProvider>),
            local: Arc::new(local),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_run_writes_rows_in_source_order() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "3"), ("R4_1", "6"), ("R3", "1")]);
        let res = resources(ScriptedProvider::repeating("True", 8), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };

        let key = RunKey::new(Subject::Audit, "R3", "ELYZA-japanese-Llama-2-7b", false);
        let mut runner = ExamRunner::new(key.clone(), ctx);
        assert_eq!(runner.state(), RunState::Init);
        let sealed = runner.run().await.unwrap();
        assert_eq!(runner.state(), RunState::Finalized);

        let t = Some(Verdict::True);
        let f = Some(Verdict::False);
        let expected: Vec<_> = sealed.rows().iter().map(|r| r.answer).collect();
        assert_eq!(expected, vec![t, f, f, t, t, t, f, f]);
        assert_eq!(sealed.total_tokens(), 0);

        let persisted = crate::reporting::read_rows(&results.rows_path(&key)).unwrap();
        assert_eq!(persisted, sealed.rows());

        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.contains("count:2\n"));
        assert!(log.contains("問題:\n監査に関する"));
        assert!(log.ends_with("Total Tokens(Main Model): 0"));

        assert!(matches!(runner.run().await, Err(RunError::AlreadyStarted(_))));
    }

    #[tokio::test]
    async fn test_unit_failure_is_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "2")]);
        let local = ScriptedProvider::new(vec![
            Ok("True".into()),
            Err(ProviderError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Ok("True".into()),
            Ok("False".into()),
        ]);
        let res = resources(local, None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };
        let key = RunKey::new(Subject::Audit, "R3", "local-model", false);

        let sealed = ExamRunner::new(key.clone(), ctx).run().await.unwrap();
        assert_eq!(sealed.rows().len(), 4);
        assert_eq!(sealed.rows()[1].result, "API error: 503 - overloaded");
        assert_eq!(sealed.rows()[1].answer, Some(Verdict::False));
        assert_eq!(sealed.rows()[3].result, "False");

        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.contains("API error: 503 - overloaded\nskipped due to an error."));
    }

    #[tokio::test]
    async fn test_timeout_is_a_unit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "1")]);
        let local = ScriptedProvider::repeating("True", 4).with_delay(Duration::from_millis(200));
        let res = resources(local, None);
        let settings = run_settings(Duration::from_millis(20));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };

        let sealed = ExamRunner::new(RunKey::new(Subject::Audit, "R3", "slow", false), ctx)
            .run()
            .await
            .unwrap();
        assert_eq!(sealed.rows().len(), 4);
        assert!(sealed.rows().iter().all(|r| r.result == "Timeout after 20ms"));
    }

    #[tokio::test]
    async fn test_not_implemented_aborts_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        results.ensure_dirs().unwrap();
        let key = RunKey::new(Subject::Audit, "R3", "ELYZA-japanese-Llama-2-7b", true);
        fs::write(results.rows_path(&key), "result,answer\nTrue,True\n").unwrap();

        let set = question_set(&[("R3", "3"), ("R3", "4")]);
        let res = resources(ScriptedProvider::repeating("True", 8), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };

        let mut runner = ExamRunner::new(key.clone(), ctx);
        let err = runner.run().await.unwrap_err();
        assert!(err.aborts_sweep());
        assert_eq!(runner.state(), RunState::Aborted);
        assert!(!results.rows_path(&key).exists());

        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.contains("RUN ABORTED"));
        assert!(!log.contains("Total Tokens"));
    }

    #[tokio::test]
    async fn test_backend_setup_failure_is_logged_and_run_only() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "3")]);
        let res = resources(ScriptedProvider::repeating("True", 4), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: true,
        };
        let key = RunKey::new(Subject::Audit, "R3", "gpt-4o", false);
        results.ensure_dirs().unwrap();
        fs::write(results.rows_path(&key), "result,answer\nTrue,True\n").unwrap();

        let mut runner = ExamRunner::new(key.clone(), ctx);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunError::Backend(_)));
        assert!(!err.aborts_sweep());
        assert_eq!(runner.state(), RunState::Aborted);
        assert!(!results.rows_path(&key).exists());

        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.starts_with("model:gpt-4o\n"));
        assert!(log.contains("RUN ABORTED"));
    }

    #[tokio::test]
    async fn test_empty_year_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "3")]);
        let res = resources(ScriptedProvider::repeating("True", 4), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };

        let key = RunKey::new(Subject::Audit, "R9", "m", false);
        results.ensure_dirs().unwrap();
        fs::write(results.rows_path(&key), "result,answer\nTrue,True\n").unwrap();

        let err = ExamRunner::new(key.clone(), ctx).run().await.unwrap_err();
        assert!(matches!(err, RunError::NoData { .. }));
        assert!(!err.aborts_sweep());
        assert!(!results.rows_path(&key).exists());
        assert!(!results.transcript_path(&key).exists());
    }

    #[tokio::test]
    async fn test_rows_write_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "3")]);
        let res = resources(ScriptedProvider::repeating("True", 4), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };
        let key = RunKey::new(Subject::Audit, "R3", "m", false);
        fs::create_dir_all(results.rows_path(&key)).unwrap();

        let mut runner = ExamRunner::new(key.clone(), ctx);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunError::Csv(_) | RunError::Io(_)));
        assert!(!err.aborts_sweep());
        assert_eq!(runner.state(), RunState::Aborted);

        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.contains("RUN ABORTED"));
        assert!(!log.contains("Total Tokens"));
    }

    #[tokio::test]
    async fn test_undecodable_question_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "7"), ("R3", "5")]);
        let res = resources(ScriptedProvider::repeating("False", 4), None);
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: false,
        };
        let key = RunKey::new(Subject::Audit, "R3", "m", false);

        let sealed = ExamRunner::new(key.clone(), ctx).run().await.unwrap();
        assert_eq!(sealed.rows().len(), 4);
        let log = fs::read_to_string(results.transcript_path(&key)).unwrap();
        assert!(log.contains("Decoding error"));
        assert!(log.contains("question skipped."));
    }

    #[tokio::test]
    async fn test_api_model_counts_prompt_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultLayout::new(dir.path());
        let set = question_set(&[("R3", "1")]);
        let api = ScriptedProvider::new(vec![
            Ok("True".into()),
            Ok("True".into()),
            Err(ProviderError::Parse("bad body".to_string())),
            Ok("False".into()),
        ]);
        let res = resources(ScriptedProvider::repeating("x", 0), Some(api));
        let settings = run_settings(Duration::from_secs(5));
        let ctx = RunContext {
            questions: &set,
            resources: &res,
            backend: &backend_settings(),
            settings: &settings,
            results: &results,
            is_api_model: true,
        };

        let sealed = ExamRunner::new(RunKey::new(Subject::Audit, "R3", "gpt-4-0613", false), ctx)
            .run()
            .await
            .unwrap();

        let counter = TokenCounter::for_model("gpt-4-0613");
        let q = &set.questions[0];
        let expected: u64 = [0usize, 1, 3]
            .iter()
            .map(|i| counter.count(&settings.compose(&format!("{}\n{}", q.question, q.statements[*i]))))
            .sum();
        assert!(expected > 0);
        assert_eq!(sealed.total_tokens(), expected);
    }
}
