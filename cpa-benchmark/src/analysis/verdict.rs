//! Verdict extraction from raw model output

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::questions::Verdict;

/// Token pair a model is asked to answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictNotation {
    /// `True` / `False`
    #[default]
    Boolean,
    /// `〇` / `×`
    CircleCross,
}

impl VerdictNotation {
    /// The token a correct, well-formed answer consists of
    pub fn canonical_token(&self, verdict: Verdict) -> &'static str {
        match (self, verdict) {
            (VerdictNotation::Boolean, Verdict::True) => "True",
            (VerdictNotation::Boolean, Verdict::False) => "False",
            (VerdictNotation::CircleCross, Verdict::True) => "〇",
            (VerdictNotation::CircleCross, Verdict::False) => "×",
        }
    }

    fn recognize(&self, normalized: &str) -> Option<Verdict> {
        match self {
            VerdictNotation::Boolean => match normalized {
                "true" => Some(Verdict::True),
                "false" => Some(Verdict::False),
                _ => None,
            },
            VerdictNotation::CircleCross => match normalized {
                "〇" | "○" | "◯" => Some(Verdict::True),
                "×" | "✕" | "✗" | "☓" => Some(Verdict::False),
                _ => None,
            },
        }
    }
}

const WRAPPING: &str = r#"^[\s"'“”‘’「」『』\[\]()（）【】]+|[\s"'“”‘’「」『』\[\]()（）【】。．.!！]+$"#;

fn wrapping() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(WRAPPING).ok()).as_ref()
}

/// Trim, strip surrounding quotes/brackets and trailing punctuation, case-fold.
pub fn normalize_response(raw: &str) -> String {
    let stripped = match wrapping() {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw.trim().to_string(),
    };
    stripped.to_lowercase()
}

/// Read a verdict out of a raw response.
///
/// Only a response that normalizes to exactly one canonical token is scored.
/// Prose, error text and partial output return `None`; nothing is coerced.
pub fn extract_verdict(raw: &str, notation: VerdictNotation) -> Option<Verdict> {
    notation.recognize(&normalize_response(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_tokens() {
        let n = VerdictNotation::Boolean;
        assert_eq!(extract_verdict("True", n), Some(Verdict::True));
        assert_eq!(extract_verdict("  false\n", n), Some(Verdict::False));
        assert_eq!(extract_verdict("”True”", n), Some(Verdict::True));
        assert_eq!(extract_verdict("「False」。", n), Some(Verdict::False));
        assert_eq!(extract_verdict("TRUE.", n), Some(Verdict::True));
    }

    #[test]
    fn test_unrecognized_is_unscored() {
        let n = VerdictNotation::Boolean;
        assert_eq!(extract_verdict("この記述はTrueです。", n), None);
        assert_eq!(extract_verdict("True or False", n), None);
        assert_eq!(extract_verdict("Timeout after 120000ms", n), None);
        assert_eq!(extract_verdict("", n), None);
        assert_eq!(extract_verdict("〇", n), None);
    }

    #[test]
    fn test_circle_cross_tokens() {
        let n = VerdictNotation::CircleCross;
        assert_eq!(extract_verdict("〇", n), Some(Verdict::True));
        assert_eq!(extract_verdict("○", n), Some(Verdict::True));
        assert_eq!(extract_verdict("「×」", n), Some(Verdict::False));
        assert_eq!(extract_verdict("✕。", n), Some(Verdict::False));
        assert_eq!(extract_verdict("True", n), None);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        for notation in [VerdictNotation::Boolean, VerdictNotation::CircleCross] {
            for verdict in [Verdict::True, Verdict::False] {
                let token = notation.canonical_token(verdict);
                assert_eq!(extract_verdict(token, notation), Some(verdict));
                let once = normalize_response(token);
                assert_eq!(normalize_response(&once), once);
                assert_eq!(extract_verdict(&once, notation), Some(verdict));
            }
        }

        for raw in ["  『True』。 ", "(false)", "“×”."] {
            let once = normalize_response(raw);
            assert_eq!(normalize_response(&once), once);
        }
    }
}
