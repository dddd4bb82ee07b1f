//! The full benchmark grid: retrieval modes × subjects × models × years

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::exam::{ExamRunner, RunContext, RunError, RunSettings};
use super::record::RunKey;
use crate::analysis::{MetricsRow, ScoringEngine, ScoringError};
use crate::backends::{BackendResources, BackendSettings};
use crate::config::Config;
use crate::questions::{QuestionSet, Subject};
use crate::reporting::{write_summary, ResultLayout};

/// Metrics of one (subject, retrieval mode) pair
pub struct SummaryTable {
    pub subject: Subject,
    pub retrieval: bool,
    pub path: PathBuf,
    pub rows: IndexMap<RunKey, Result<MetricsRow, ScoringError>>,
}

/// What a sweep produced
#[derive(Default)]
pub struct SweepOutcome {
    pub completed: Vec<RunKey>,
    pub failed: Vec<(RunKey, String)>,
    pub summaries: Vec<SummaryTable>,
}

/// Runs every configured cell one at a time, then scores each (subject, retrieval) pair
pub struct Sweep<'a> {
    config: &'a Config,
    resources: BackendResources,
    results: ResultLayout,
}

impl<'a> Sweep<'a> {
    pub fn new(config: &'a Config, resources: BackendResources) -> Self {
        Self {
            config,
            resources,
            results: ResultLayout::new(&config.paths.result_dir),
        }
    }

    fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            system_prompt: self.config.prompts.system.clone(),
            max_tokens: self.config.sweep.max_output_tokens,
            max_tool_rounds: self.config.retrieval.max_tool_rounds,
        }
    }

    fn run_settings(&self, subject: Subject) -> RunSettings {
        RunSettings {
            pre_question: self.config.prompts.pre_question.clone(),
            post_question: self.config.prompts.post_question.clone(),
            layout: self.config.layout_for(subject),
            timeout: Duration::from_millis(self.config.benchmark.timeout_ms),
        }
    }

    /// Run the grid. Only a run aborted by an unimplemented backend stops the sweep;
    /// every other run failure is logged and the next cell starts.
    pub async fn run(
        &self,
        question_sets: &BTreeMap<Subject, QuestionSet>,
    ) -> Result<SweepOutcome, RunError> {
        let mut outcome = SweepOutcome::default();
        let backend_settings = self.backend_settings();

        for &retrieval in &self.config.sweep.retrieval_modes {
            for subject in self.config.subjects() {
                let Some(questions) = question_sets.get(&subject) else {
                    tracing::warn!("No question table loaded for {}, skipping", subject);
                    continue;
                };
                let settings = self.run_settings(subject);
                let years = self.config.years_for(subject);

                for model in &self.config.sweep.models {
                    let is_api_model = self.config.is_api_model(model);
                    for year in years {
                        let key = RunKey::new(subject, year.as_str(), model.as_str(), retrieval);
                        let ctx = RunContext {
                            questions,
                            resources: &self.resources,
                            backend: &backend_settings,
                            settings: &settings,
                            results: &self.results,
                            is_api_model,
                        };
                        match ExamRunner::new(key.clone(), ctx).run().await {
                            Ok(sealed) => outcome.completed.push(sealed.key().clone()),
                            Err(e) if e.aborts_sweep() => return Err(e),
                            Err(e) => {
                                tracing::error!("{}: {}", key, e);
                                outcome.failed.push((key, e.to_string()));
                            }
                        }
                    }
                }

                outcome.summaries.push(summarize(self.config, subject, retrieval, Some(questions))?);
            }
        }

        Ok(outcome)
    }
}

/// Score models × years of one (subject, retrieval) pair and write its summary file.
/// With a question set, stored expected verdicts are checked against the answer key.
pub fn summarize(
    config: &Config,
    subject: Subject,
    retrieval: bool,
    questions: Option<&QuestionSet>,
) -> Result<SummaryTable, RunError> {
    let results = ResultLayout::new(&config.paths.result_dir);
    let mut engine = ScoringEngine::new(results.clone(), config.prompts.notation);
    if let Some(set) = questions {
        engine = engine.with_questions(set.clone(), config.layout_for(subject));
    }

    let keys = config.sweep.models.iter().flat_map(|model| {
        config
            .years_for(subject)
            .iter()
            .map(move |year| RunKey::new(subject, year.as_str(), model.as_str(), retrieval))
    });
    let rows = engine.aggregate(keys);

    results.ensure_dirs()?;
    let path = results.summary_path(subject, retrieval);
    write_summary(&path, &rows)?;
    tracing::info!("Wrote summary {}", path.display());

    Ok(SummaryTable {
        subject,
        retrieval,
        path,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedProvider;
    use crate::providers::LLMProvider;
    use crate::questions::fixtures::question;
    use std::sync::Arc;

    fn config(result_dir: &std::path::Path, models: &[&str], retrieval_modes: Vec<bool>) -> Config {
        let mut config = Config::default();
        config.paths.result_dir = result_dir.to_path_buf();
        config.sweep.models = models.iter().map(|m| m.to_string()).collect();
        config.sweep.retrieval_modes = retrieval_modes;
        config.sweep.years = BTreeMap::from([(
            Subject::Audit,
            vec!["R3".to_string(), "R4_1".to_string()],
        )]);
        config
    }

    fn questions() -> BTreeMap<Subject, QuestionSet> {
        BTreeMap::from([(
            Subject::Audit,
            QuestionSet {
                subject: Subject::Audit,
                questions: vec![question(Subject::Audit, "R3", "3")],
                excluded: 0,
            },
        )])
    }

    fn resources(local: ScriptedProvider) -> BackendResources {
        BackendResources {
            api: None,
            local: Arc::new(local) as Arc<dyn LLMProvider>,
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_missing_year_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["local-a"], vec![false]);
        let sweep = Sweep::new(&config, resources(ScriptedProvider::repeating("True", 4)));

        let outcome = sweep.run(&questions()).await.unwrap();
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].year, "R3");
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0.year, "R4_1");

        assert_eq!(outcome.summaries.len(), 1);
        let table = &outcome.summaries[0];
        assert_eq!(table.rows.len(), 2);
        let r3 = table.rows[0].as_ref().unwrap();
        assert_eq!(r3.support, 4);
        assert_eq!(r3.accuracy, 0.5);
        assert!(table.rows[1].is_err());

        let text = std::fs::read_to_string(&table.path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(table.path.ends_with("summary/summary_audit_rag_False.csv"));
    }

    #[tokio::test]
    async fn test_unimplemented_backend_stops_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["local-a", "local-b"], vec![true]);
        let local = ScriptedProvider::repeating("True", 16);
        let sweep = Sweep::new(&config, resources(local));

        let err = sweep.run(&questions()).await.err().unwrap();
        assert!(err.aborts_sweep());
        assert!(!dir.path().join("summary").join("summary_audit_rag_True.csv").exists());
        assert!(!dir.path().join("log").join("audit_R3_local-b_rag_True.txt").exists());
    }
}
