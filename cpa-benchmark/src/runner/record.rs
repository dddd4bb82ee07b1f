//! Run identity and the append-only record of one run

use serde::{Deserialize, Serialize};

use crate::questions::{Subject, Verdict};

/// Identifies one sweep cell: (subject, year, model, retrieval mode)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub subject: Subject,
    pub year: String,
    pub model: String,
    pub retrieval: bool,
}

impl RunKey {
    pub fn new(subject: Subject, year: impl Into<String>, model: impl Into<String>, retrieval: bool) -> Self {
        Self {
            subject,
            year: year.into(),
            model: model.into(),
            retrieval,
        }
    }

    /// File stem shared by the rows file and the transcript,
    /// e.g. `audit_R3_gpt-4o-2024-05-13_rag_False`
    pub fn file_stem(&self) -> String {
        let model: String = self
            .model
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        format!(
            "{}_{}_{}_rag_{}",
            self.subject,
            self.year,
            model,
            retrieval_label(self.retrieval)
        )
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "subject:{}, model:{}, year:{}, rag:{}",
            self.subject,
            self.model,
            self.year,
            retrieval_label(self.retrieval)
        )
    }
}

/// `True` / `False`, as used in file names
pub fn retrieval_label(retrieval: bool) -> &'static str {
    if retrieval {
        "True"
    } else {
        "False"
    }
}

/// One answered prompt: the raw backend text and the verdict it should have given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub result: String,
    pub answer: Option<Verdict>,
}

/// Rows of a run that is still answering
#[derive(Debug)]
pub struct RunRecord {
    key: RunKey,
    rows: Vec<RunRow>,
    total_tokens: u64,
}

impl RunRecord {
    pub fn new(key: RunKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
            total_tokens: 0,
        }
    }

    pub fn append(&mut self, result: impl Into<String>, answer: Option<Verdict>) {
        self.rows.push(RunRow {
            result: result.into(),
            answer,
        });
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens += tokens;
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Close the record; no rows can be added afterwards
    pub fn seal(self) -> SealedRun {
        SealedRun {
            key: self.key,
            rows: self.rows,
            total_tokens: self.total_tokens,
        }
    }
}

/// A finished run, read-only
#[derive(Debug, Clone, PartialEq)]
pub struct SealedRun {
    key: RunKey,
    rows: Vec<RunRow>,
    total_tokens: u64,
}

impl SealedRun {
    pub fn key(&self) -> &RunKey {
        &self.key
    }

    pub fn rows(&self) -> &[RunRow] {
        &self.rows
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}
