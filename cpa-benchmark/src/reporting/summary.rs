//! Per-(subject, retrieval) metrics summary file

use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;

use super::ReportError;
use crate::analysis::{MetricsRow, ScoringError};
use crate::runner::RunKey;

#[derive(Debug, Serialize)]
struct SummaryRecord<'a> {
    model_name: &'a str,
    year: &'a str,
    #[serde(rename = "TN")]
    tn: Option<u32>,
    #[serde(rename = "FP")]
    fp: Option<u32>,
    #[serde(rename = "FN")]
    fn_: Option<u32>,
    #[serde(rename = "TP")]
    tp: Option<u32>,
    accuracy: Option<f64>,
    precision: Option<f64>,
    recall: Option<f64>,
    #[serde(rename = "f1-score")]
    f1: Option<f64>,
    support: Option<u32>,
}

impl<'a> SummaryRecord<'a> {
    fn metrics(row: &'a MetricsRow) -> Self {
        Self {
            model_name: &row.key.model,
            year: &row.key.year,
            tn: Some(row.matrix.tn),
            fp: Some(row.matrix.fp),
            fn_: Some(row.matrix.fn_),
            tp: Some(row.matrix.tp),
            accuracy: Some(row.accuracy),
            precision: Some(row.precision),
            recall: Some(row.recall),
            f1: Some(row.f1),
            support: Some(row.support),
        }
    }

    /// Key whose metrics could not be computed: metric cells stay empty
    fn gap(key: &'a RunKey) -> Self {
        Self {
            model_name: &key.model,
            year: &key.year,
            tn: None,
            fp: None,
            fn_: None,
            tp: None,
            accuracy: None,
            precision: None,
            recall: None,
            f1: None,
            support: None,
        }
    }
}

/// Write one summary row per key, in table order. Failed keys become gap rows.
pub fn write_summary(
    path: &Path,
    table: &IndexMap<RunKey, Result<MetricsRow, ScoringError>>,
) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (key, entry) in table {
        let record = match entry {
            Ok(row) => SummaryRecord::metrics(row),
            Err(_) => SummaryRecord::gap(key),
        };
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
