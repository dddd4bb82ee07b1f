//! Binary classification metrics over scored rows

use serde::{Deserialize, Serialize};

use crate::questions::Verdict;
use crate::runner::RunKey;

/// 2×2 confusion matrix with `True` as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: u32,
    pub fp: u32,
    pub fn_: u32,
    pub tp: u32,
}

impl ConfusionMatrix {
    /// Build from (predicted, expected) pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Verdict, Verdict)>,
    {
        let mut m = Self::default();
        for (predicted, expected) in pairs {
            m.record(predicted, expected);
        }
        m
    }

    pub fn record(&mut self, predicted: Verdict, expected: Verdict) {
        match (predicted, expected) {
            (Verdict::True, Verdict::True) => self.tp += 1,
            (Verdict::True, Verdict::False) => self.fp += 1,
            (Verdict::False, Verdict::True) => self.fn_ += 1,
            (Verdict::False, Verdict::False) => self.tn += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// F1 (beta = 1)
    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// Zero denominators score 0.0
fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Metrics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub key: RunKey,
    pub matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of scored rows
    pub support: u32,
}

impl MetricsRow {
    pub fn from_matrix(key: RunKey, matrix: ConfusionMatrix) -> Self {
        Self {
            key,
            accuracy: matrix.accuracy(),
            precision: matrix.precision(),
            recall: matrix.recall(),
            f1: matrix.f1(),
            support: matrix.total(),
            matrix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::Subject;

    #[test]
    fn test_perfect_predictions() {
        let expected = [
            Verdict::True,
            Verdict::True,
            Verdict::True,
            Verdict::True,
            Verdict::True,
            Verdict::True,
            Verdict::False,
            Verdict::False,
            Verdict::False,
            Verdict::False,
        ];
        let m = ConfusionMatrix::from_pairs(expected.iter().map(|v| (*v, *v)));
        let row = MetricsRow::from_matrix(RunKey::new(Subject::Audit, "R3", "gpt-4o", false), m);

        assert_eq!((m.tp, m.tn, m.fp, m.fn_), (6, 4, 0, 0));
        assert_eq!(row.accuracy, 1.0);
        assert_eq!(row.precision, 1.0);
        assert_eq!(row.recall, 1.0);
        assert_eq!(row.f1, 1.0);
        assert_eq!(row.support, 10);
    }

    #[test]
    fn test_mixed_predictions() {
        let m = ConfusionMatrix::from_pairs([
            (Verdict::True, Verdict::True),
            (Verdict::True, Verdict::False),
            (Verdict::False, Verdict::True),
            (Verdict::False, Verdict::False),
        ]);
        assert_eq!(m.accuracy(), 0.5);
        assert_eq!(m.precision(), 0.5);
        assert_eq!(m.recall(), 0.5);
        assert!((m.f1() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        // Never predicts the positive class
        let m = ConfusionMatrix::from_pairs([
            (Verdict::False, Verdict::False),
            (Verdict::False, Verdict::True),
        ]);
        assert_eq!(m.precision(), 0.0);
        assert_eq!(m.recall(), 0.0);
        assert_eq!(m.f1(), 0.0);
        assert_eq!(m.accuracy(), 0.5);
    }
}
