//! Scoring of persisted runs and aggregation into a summary table

use indexmap::IndexMap;
use std::collections::HashMap;

use super::metrics::{ConfusionMatrix, MetricsRow};
use super::verdict::{extract_verdict, VerdictNotation};
use crate::questions::codec::option_truth;
use crate::questions::{
    format_expected, AnswerNumber, ExamQuestion, LoadError, QuestionLayout, QuestionSet, Subject,
    Verdict, ANSWER_KEY,
};
use crate::reporting::{read_rows, ReportError, ResultLayout};
use crate::runner::{RunKey, RunRow};

/// Errors computing metrics for one run
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("No scorable rows for {0}")]
    InsufficientData(RunKey),

    #[error("Stored expected verdicts disagree with the answer key for {key}: {detail}")]
    ExpectedMismatch { key: RunKey, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Question load error: {0}")]
    Load(#[from] LoadError),
}

impl From<ReportError> for ScoringError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Io(e) => ScoringError::Io(e),
            ReportError::Csv(e) => ScoringError::Csv(e),
        }
    }
}

/// Reads persisted runs and computes their metrics
pub struct ScoringEngine {
    results: ResultLayout,
    notation: VerdictNotation,
    /// Question sets used to re-derive expected verdicts, per subject
    reference: HashMap<Subject, (QuestionSet, QuestionLayout)>,
}

impl ScoringEngine {
    pub fn new(results: ResultLayout, notation: VerdictNotation) -> Self {
        Self {
            results,
            notation,
            reference: HashMap::new(),
        }
    }

    /// Check stored `answer` columns of this subject against the question table
    pub fn with_questions(mut self, set: QuestionSet, layout: QuestionLayout) -> Self {
        self.reference.insert(set.subject, (set, layout));
        self
    }

    pub fn load_responses(&self, key: &RunKey) -> Result<Vec<RunRow>, ScoringError> {
        Ok(read_rows(&self.results.rows_path(key))?)
    }

    pub fn compute_metrics(&self, key: &RunKey) -> Result<MetricsRow, ScoringError> {
        let rows = self.load_responses(key)?;
        if let Some((set, layout)) = self.reference.get(&key.subject) {
            cross_validate(key, &rows, set, *layout)?;
        }
        score_rows(key.clone(), &rows, self.notation)
    }

    /// Metrics per key, in the order given. A failing key keeps its error as a
    /// gap entry; the remaining keys are still scored.
    pub fn aggregate<I>(&self, keys: I) -> IndexMap<RunKey, Result<MetricsRow, ScoringError>>
    where
        I: IntoIterator<Item = RunKey>,
    {
        let mut table = IndexMap::new();
        for key in keys {
            let entry = self.compute_metrics(&key);
            match &entry {
                Ok(row) => tracing::debug!(
                    "Scored {}: accuracy {:.3} over {} rows",
                    key,
                    row.accuracy,
                    row.support
                ),
                Err(e) => tracing::warn!("Could not score {}: {}", key, e),
            }
            table.insert(key, entry);
        }
        table
    }
}

/// Metrics over the scored rows of a run.
///
/// Rows whose response is not a canonical token, or whose expected verdict is
/// unknown, are left out.
pub fn score_rows(
    key: RunKey,
    rows: &[RunRow],
    notation: VerdictNotation,
) -> Result<MetricsRow, ScoringError> {
    let matrix = ConfusionMatrix::from_pairs(rows.iter().filter_map(|row| {
        let predicted = extract_verdict(&row.result, notation)?;
        Some((predicted, row.answer?))
    }));
    if matrix.total() == 0 {
        return Err(ScoringError::InsufficientData(key));
    }
    Ok(MetricsRow::from_matrix(key, matrix))
}

/// Expected verdicts of a question computed straight from the answer-key rows.
/// `None` for questions the runner skips.
fn reference_verdicts(question: &ExamQuestion, layout: QuestionLayout) -> Option<[Option<Verdict>; 4]> {
    match layout {
        QuestionLayout::FixedKey => ANSWER_KEY.row(&question.answer_number).ok(),
        QuestionLayout::OptionDerived => {
            let truths = question
                .options
                .iter()
                .map(|cell| cell.as_text().and_then(|t| option_truth(t).ok()))
                .collect::<Option<Vec<[bool; 4]>>>()?;
            match &question.answer_number {
                AnswerNumber::NoValidAnswer => Some([None; 4]),
                AnswerNumber::Choice(n) => {
                    let truth = truths.get(usize::from(*n).checked_sub(1)?)?;
                    Some(truth.map(|b| Some(Verdict::from_bool(b))))
                }
                AnswerNumber::Unparsed(_) => None,
            }
        }
    }
}

fn cross_validate(
    key: &RunKey,
    rows: &[RunRow],
    set: &QuestionSet,
    layout: QuestionLayout,
) -> Result<(), ScoringError> {
    let derived: Vec<Option<Verdict>> = set
        .for_year(&key.year)
        .filter_map(|q| reference_verdicts(q, layout))
        .flatten()
        .collect();

    if derived.len() != rows.len() {
        return Err(ScoringError::ExpectedMismatch {
            key: key.clone(),
            detail: format!("{} stored rows, {} derived from the question table", rows.len(), derived.len()),
        });
    }

    for (i, (row, expected)) in rows.iter().zip(&derived).enumerate() {
        if row.answer != *expected {
            return Err(ScoringError::ExpectedMismatch {
                key: key.clone(),
                detail: format!(
                    "row {} stored {} but the answer key gives {}",
                    i,
                    format_expected(row.answer),
                    format_expected(*expected)
                ),
            });
        }
    }
    Ok(())
}
