//! Exam question definitions, answer-key decoding and loading

pub mod answer_key;
pub mod codec;
pub mod loader;

pub use answer_key::{AnswerKeyTable, ANSWER_KEY};
pub use codec::{expand, expand_with_options, expand_with_layout, CodecError, PromptUnit, PromptUnits};
pub use loader::{load_questions, load_questions_from_reader, LoadError, QuestionSet};

use serde::{Deserialize, Serialize};

/// Exam subject. Each subject maps to one question table on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Audit,
    CoAct,
}

impl Subject {
    pub fn all() -> Vec<Subject> {
        vec![Subject::Audit, Subject::CoAct]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Audit => "audit",
            Subject::CoAct => "co_act",
        }
    }

    /// File name of the question table inside the data directory
    pub fn data_file(&self) -> &'static str {
        match self {
            Subject::Audit => "CPA_AUDIT.csv",
            Subject::CoAct => "CPA_CO_ACT.csv",
        }
    }

    /// Whether the table carries an `abnormal_flg` exclusion column
    pub fn has_abnormal_flag(&self) -> bool {
        matches!(self, Subject::Audit)
    }

    /// Layout used when no override is configured
    pub fn default_layout(&self) -> QuestionLayout {
        match self {
            Subject::Audit => QuestionLayout::FixedKey,
            Subject::CoAct => QuestionLayout::OptionDerived,
        }
    }
}

impl std::str::FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audit" => Ok(Subject::Audit),
            "co_act" | "coact" | "co-act" => Ok(Subject::CoAct),
            _ => Err(format!("Unknown subject: {} (expected audit or co_act)", s)),
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the expected verdicts of a question are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionLayout {
    /// `a_no` indexes the fixed answer-key table
    FixedKey,
    /// `a_no` selects one of six option texts that name the true sub-statements
    OptionDerived,
}

/// Sub-statement slot (ア, イ, ウ, エ in the source tables)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
    C,
    D,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::A, Slot::B, Slot::C, Slot::D];

    pub fn index(&self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
            Slot::C => 2,
            Slot::D => 3,
        }
    }

    /// Column header / option marker used by the exam tables
    pub fn marker(&self) -> &'static str {
        match self {
            Slot::A => "ア",
            Slot::B => "イ",
            Slot::C => "ウ",
            Slot::D => "エ",
        }
    }
}

/// A true/false judgement on one sub-statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    True,
    False,
}

impl Verdict {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Verdict::True
        } else {
            Verdict::False
        }
    }
}

/// Expected verdicts are persisted as `True` / `False`, with `-` for an unknown answer.
pub fn format_expected(expected: Option<Verdict>) -> &'static str {
    match expected {
        Some(Verdict::True) => "True",
        Some(Verdict::False) => "False",
        None => "-",
    }
}

/// Inverse of [`format_expected`]. Returns `None` for anything that is not a stored verdict.
pub fn parse_expected(raw: &str) -> Option<Verdict> {
    match raw.trim() {
        "True" | "true" | "TRUE" => Some(Verdict::True),
        "False" | "false" | "FALSE" => Some(Verdict::False),
        _ => None,
    }
}

/// The `a_no` column of a question record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerNumber {
    /// A numbered option
    Choice(u8),
    /// The `-` sentinel used when the exam withdrew the question
    NoValidAnswer,
    /// Anything that could not be read as either of the above
    Unparsed(String),
}

impl AnswerNumber {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "-" {
            return AnswerNumber::NoValidAnswer;
        }
        if let Ok(n) = trimmed.parse::<u8>() {
            return AnswerNumber::Choice(n);
        }
        // Tables exported through a float column carry values like "3.0"
        match trimmed.parse::<f64>() {
            Ok(f) if f.fract() == 0.0 && (0.0..=255.0).contains(&f) => AnswerNumber::Choice(f as u8),
            _ => AnswerNumber::Unparsed(trimmed.to_string()),
        }
    }
}

impl std::fmt::Display for AnswerNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerNumber::Choice(n) => write!(f, "{}", n),
            AnswerNumber::NoValidAnswer => write!(f, "-"),
            AnswerNumber::Unparsed(raw) => write!(f, "{:?}", raw),
        }
    }
}

/// One of the six numbered answer options, typed the way the cell reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionCell {
    Text(String),
    Numeric(f64),
    Blank,
}

impl OptionCell {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            OptionCell::Blank
        } else if let Ok(n) = trimmed.parse::<f64>() {
            OptionCell::Numeric(n)
        } else {
            OptionCell::Text(trimmed.to_string())
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionCell::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A single exam question as read from the question table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub subject: Subject,
    pub year: String,
    pub question: String,
    pub statements: [String; 4],
    pub options: [OptionCell; 6],
    pub answer_number: AnswerNumber,
    pub abnormal: bool,
}

impl ExamQuestion {
    pub fn statement(&self, slot: Slot) -> &str {
        &self.statements[slot.index()]
    }
}
