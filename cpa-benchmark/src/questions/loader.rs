//! Question loading from the exam CSV tables

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use super::{AnswerNumber, ExamQuestion, OptionCell, Slot, Subject};

/// Error type for question loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column: {0}")]
    MissingColumn(String),
}

/// All usable questions of one subject, in table order
#[derive(Debug, Clone)]
pub struct QuestionSet {
    pub subject: Subject,
    pub questions: Vec<ExamQuestion>,
    /// Rows dropped by the `abnormal_flg` filter
    pub excluded: usize,
}

impl QuestionSet {
    /// Questions of one exam sitting, in table order
    pub fn for_year<'a>(&'a self, year: &str) -> impl Iterator<Item = &'a ExamQuestion> + 'a {
        let year = year.to_owned();
        self.questions.iter().filter(move |q| q.year == year)
    }

    /// Distinct years in first-seen order
    pub fn years(&self) -> Vec<String> {
        let mut years: Vec<String> = Vec::new();
        for q in &self.questions {
            if !years.contains(&q.year) {
                years.push(q.year.clone());
            }
        }
        years
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Load the question table for a subject from the data directory
pub fn load_questions(data_dir: impl AsRef<Path>, subject: Subject) -> Result<QuestionSet, LoadError> {
    let path = data_dir.as_ref().join(subject.data_file());
    let file = std::fs::File::open(&path)?;
    let set = load_questions_from_reader(file, subject)?;
    tracing::debug!(
        "Loaded {} questions for {} from {} ({} excluded)",
        set.len(),
        subject,
        path.display(),
        set.excluded
    );
    Ok(set)
}

/// Load a question table from any reader
pub fn load_questions_from_reader<R: Read>(reader: R, subject: Subject) -> Result<QuestionSet, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_string(), i))
        .collect();

    let required = |name: &str| -> Result<usize, LoadError> {
        columns
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::MissingColumn(name.to_string()))
    };

    let question_col = required("question")?;
    let answer_col = required("a_no")?;
    let year_col = required("key")?;
    let statement_cols = [
        required(Slot::A.marker())?,
        required(Slot::B.marker())?,
        required(Slot::C.marker())?,
        required(Slot::D.marker())?,
    ];
    // Option columns are only needed by the option-derived layout
    let option_cols: Vec<Option<usize>> = (1..=6).map(|i| columns.get(&i.to_string()).copied()).collect();
    let abnormal_col = if subject.has_abnormal_flag() {
        Some(required("abnormal_flg")?)
    } else {
        None
    };

    let mut questions = Vec::new();
    let mut excluded = 0;

    for result in csv_reader.records() {
        let record = result?;
        let cell = |idx: usize| record.get(idx).unwrap_or("").to_string();

        let abnormal = abnormal_col.map(|idx| is_flag_set(&cell(idx))).unwrap_or(false);
        if abnormal {
            excluded += 1;
            continue;
        }

        let options: [OptionCell; 6] = std::array::from_fn(|i| {
            option_cols[i]
                .map(|idx| OptionCell::parse(&cell(idx)))
                .unwrap_or(OptionCell::Blank)
        });

        questions.push(ExamQuestion {
            subject,
            year: cell(year_col).trim().to_string(),
            question: cell(question_col),
            statements: statement_cols.map(cell),
            options,
            answer_number: AnswerNumber::parse(&cell(answer_col)),
            abnormal,
        });
    }

    Ok(QuestionSet {
        subject,
        questions,
        excluded,
    })
}

fn is_flag_set(raw: &str) -> bool {
    raw.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(false)
}
