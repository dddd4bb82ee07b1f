//! Per-run output files: the rows CSV and the transcript log

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::ReportError;
use crate::questions::{format_expected, parse_expected, Subject, Verdict};
use crate::runner::{retrieval_label, RunKey, RunRow};

const SEPARATOR: &str = "######\n######\n";

/// Directory layout under the result root
#[derive(Debug, Clone)]
pub struct ResultLayout {
    root: PathBuf,
}

impl ResultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn rows_path(&self, key: &RunKey) -> PathBuf {
        self.root.join("csv").join(format!("{}.csv", key.file_stem()))
    }

    pub fn transcript_path(&self, key: &RunKey) -> PathBuf {
        self.root.join("log").join(format!("{}.txt", key.file_stem()))
    }

    pub fn summary_path(&self, subject: Subject, retrieval: bool) -> PathBuf {
        self.root.join("summary").join(format!(
            "summary_{}_rag_{}.csv",
            subject,
            retrieval_label(retrieval)
        ))
    }

    /// Create `csv/`, `log/` and `summary/`
    pub fn ensure_dirs(&self) -> Result<(), ReportError> {
        for dir in ["csv", "log", "summary"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RowRecord {
    result: String,
    answer: String,
}

/// Write run rows as `result,answer`
pub fn write_rows(path: &Path, rows: &[RunRow]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(RowRecord {
            result: row.result.clone(),
            answer: format_expected(row.answer).to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read rows written by [`write_rows`]
pub fn read_rows(path: &Path) -> Result<Vec<RunRow>, ReportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let record: RowRecord = record?;
        rows.push(RunRow {
            answer: parse_expected(&record.answer),
            result: record.result,
        });
    }
    Ok(rows)
}

/// Remove a rows file left behind by an earlier run, if any
pub fn remove_stale_rows(path: &Path) -> Result<bool, ReportError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Human-readable log of one run: every query, response and failure
pub struct TranscriptWriter {
    out: BufWriter<File>,
}

impl TranscriptWriter {
    pub fn create(path: &Path) -> Result<Self, ReportError> {
        let file = File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn header(
        &mut self,
        key: &RunKey,
        question_count: usize,
        started: DateTime<Local>,
    ) -> Result<(), ReportError> {
        writeln!(self.out, "model:{}", key.model)?;
        writeln!(self.out, "year:{}", key.year)?;
        writeln!(self.out, "rag:{}", retrieval_label(key.retrieval))?;
        writeln!(self.out, "count:{}", question_count)?;
        writeln!(self.out, "{}", started.format("%Y年%m月%d日 %H:%M:%S"))?;
        Ok(())
    }

    pub fn question(&mut self, index: usize) -> Result<(), ReportError> {
        writeln!(self.out, "q{}", index)?;
        Ok(())
    }

    pub fn query(&mut self, query: &str) -> Result<(), ReportError> {
        writeln!(self.out, "{}", query)?;
        Ok(())
    }

    pub fn answered(&mut self, response: &str, expected: Option<Verdict>) -> Result<(), ReportError> {
        write!(
            self.out,
            "{}\n正解:{}\n{}",
            response,
            format_expected(expected),
            SEPARATOR
        )?;
        Ok(())
    }

    pub fn failed(&mut self, error: &str) -> Result<(), ReportError> {
        write!(self.out, "{}\nskipped due to an error.\n{}", error, SEPARATOR)?;
        Ok(())
    }

    /// A question whose sub-statements could not be derived
    pub fn skipped_question(&mut self, error: &str) -> Result<(), ReportError> {
        write!(self.out, "{}\nquestion skipped.\n{}", error, SEPARATOR)?;
        Ok(())
    }

    /// Marks the run as incomplete; no rows file accompanies this transcript
    pub fn aborted(&mut self, error: &str) -> Result<(), ReportError> {
        write!(self.out, "{}\n##########\nRUN ABORTED: incomplete, no results written\n", error)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn finish(mut self, total_tokens: u64) -> Result<(), ReportError> {
        write!(self.out, "##########\nTotal Tokens(Main Model): {}", total_tokens)?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RunKey {
        RunKey::new(Subject::Audit, "R3", "gpt-4o", false)
    }

    #[test]
    fn test_layout_paths() {
        let layout = ResultLayout::new("result");
        assert_eq!(
            layout.rows_path(&key()),
            PathBuf::from("result/csv/audit_R3_gpt-4o_rag_False.csv")
        );
        assert_eq!(
            layout.transcript_path(&key()),
            PathBuf::from("result/log/audit_R3_gpt-4o_rag_False.txt")
        );
        assert_eq!(
            layout.summary_path(Subject::CoAct, true),
            PathBuf::from("result/summary/summary_co_act_rag_True.csv")
        );
    }

    #[test]
    fn test_rows_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let rows = vec![
            RunRow { result: "True".to_string(), answer: Some(Verdict::True) },
            RunRow { result: "API error: 500 - boom, retry".to_string(), answer: Some(Verdict::False) },
            RunRow { result: "False".to_string(), answer: None },
        ];
        write_rows(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("result,answer\n"));
        assert!(text.contains("\"API error: 500 - boom, retry\",False"));
        assert!(text.contains("False,-"));

        assert_eq!(read_rows(&path).unwrap(), rows);
    }

    #[test]
    fn test_remove_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.csv");
        assert!(!remove_stale_rows(&path).unwrap());
        fs::write(&path, "result,answer\n").unwrap();
        assert!(remove_stale_rows(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_transcript_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let started = Local::now();

        let mut t = TranscriptWriter::create(&path).unwrap();
        t.header(&key(), 2, started).unwrap();
        t.question(0).unwrap();
        t.query("問題:\nQ\n記述ア\n回答:").unwrap();
        t.answered("True", Some(Verdict::True)).unwrap();
        t.query("問題:\nQ\n記述イ\n回答:").unwrap();
        t.failed("Timeout after 10ms").unwrap();
        t.finish(42).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("model:gpt-4o\nyear:R3\nrag:False\ncount:2\n"));
        assert!(text.contains("True\n正解:True\n######\n######\n"));
        assert!(text.contains("Timeout after 10ms\nskipped due to an error.\n"));
        assert!(text.ends_with("Total Tokens(Main Model): 42"));
    }
}
