//! Results reporting

pub mod run_files;
pub mod summary;

pub use run_files::{read_rows, remove_stale_rows, write_rows, ResultLayout, TranscriptWriter};
pub use summary::write_summary;

use indexmap::IndexMap;

use crate::analysis::{MetricsRow, ScoringError};
use crate::runner::RunKey;

/// Errors writing or reading result files
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Print an aggregated metrics table
pub fn print_console_report(title: &str, table: &IndexMap<RunKey, Result<MetricsRow, ScoringError>>) {
    println!("\n=== {} ===\n", title);
    println!(
        "{:<32} {:<8} {:>5} {:>5} {:>5} {:>5} {:>8} {:>8} {:>8} {:>8} {:>7}",
        "model", "year", "TN", "FP", "FN", "TP", "acc", "prec", "recall", "f1", "support"
    );
    println!("{:-<110}", "");

    for (key, entry) in table {
        match entry {
            Ok(row) => println!(
                "{:<32} {:<8} {:>5} {:>5} {:>5} {:>5} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>7}",
                key.model,
                key.year,
                row.matrix.tn,
                row.matrix.fp,
                row.matrix.fn_,
                row.matrix.tp,
                row.accuracy,
                row.precision,
                row.recall,
                row.f1,
                row.support
            ),
            Err(e) => println!("{:<32} {:<8} -- {}", key.model, key.year, e),
        }
    }

    let scored: Vec<&MetricsRow> = table.values().filter_map(|r| r.as_ref().ok()).collect();
    if !scored.is_empty() {
        let mean = scored.iter().map(|r| r.accuracy).sum::<f64>() / scored.len() as f64;
        println!("{:-<110}", "");
        println!(
            "{} of {} runs scored, mean accuracy {:.3}",
            scored.len(),
            table.len(),
            mean
        );
    }

    println!("\n{:=<110}", "");
}
