//! Expansion of exam questions into per-statement prompts

use super::answer_key::ANSWER_KEY;
use super::{AnswerNumber, ExamQuestion, QuestionLayout, Slot, Verdict};

/// Errors raised while expanding a question
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Decoding error: answer number {0} is not in the answer key")]
    Decoding(String),

    #[error("Format mismatch: {0}")]
    FormatMismatch(String),
}

/// One (prompt, expected verdict) pair derived from a sub-statement
#[derive(Debug, Clone, PartialEq)]
pub struct PromptUnit {
    pub slot: Slot,
    pub text: String,
    /// `None` when the question has no valid answer
    pub expected: Option<Verdict>,
}

/// Lazy sequence of the four prompt units of a question.
///
/// Yields slots A–D in order and then stops. Cloning restarts from the current position.
#[derive(Debug, Clone)]
pub struct PromptUnits<'a> {
    question: &'a ExamQuestion,
    verdicts: [Option<Verdict>; 4],
    next_slot: usize,
}

impl<'a> PromptUnits<'a> {
    fn new(question: &'a ExamQuestion, verdicts: [Option<Verdict>; 4]) -> Self {
        Self {
            question,
            verdicts,
            next_slot: 0,
        }
    }
}

impl Iterator for PromptUnits<'_> {
    type Item = PromptUnit;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = *Slot::ALL.get(self.next_slot)?;
        self.next_slot += 1;
        Some(PromptUnit {
            slot,
            text: format!("{}\n{}", self.question.question, self.question.statement(slot)),
            expected: self.verdicts[slot.index()],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = Slot::ALL.len() - self.next_slot;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PromptUnits<'_> {}

/// Expand a question using the fixed answer-key table
pub fn expand(question: &ExamQuestion) -> Result<PromptUnits<'_>, CodecError> {
    let mut verdicts = [None; 4];
    for slot in Slot::ALL {
        verdicts[slot.index()] = ANSWER_KEY.verdict(&question.answer_number, slot)?;
    }
    Ok(PromptUnits::new(question, verdicts))
}

/// Expand a question whose six option texts name the true statements.
///
/// All six options must be text. Tables that type an option as a number or leave
/// it blank use a five-choice layout that this expansion does not support.
pub fn expand_with_options(question: &ExamQuestion) -> Result<PromptUnits<'_>, CodecError> {
    let mut option_texts = Vec::with_capacity(question.options.len());
    for (i, cell) in question.options.iter().enumerate() {
        match cell.as_text() {
            Some(text) => option_texts.push(text),
            None => {
                return Err(CodecError::FormatMismatch(format!(
                    "option {} of question {:?} ({}) is {:?}, expected six text options",
                    i + 1,
                    truncate(&question.question, 40),
                    question.year,
                    cell
                )))
            }
        }
    }

    let verdicts = match &question.answer_number {
        AnswerNumber::NoValidAnswer => [None; 4],
        AnswerNumber::Choice(n) => {
            let idx = usize::from(*n)
                .checked_sub(1)
                .filter(|i| *i < option_texts.len())
                .ok_or_else(|| CodecError::Decoding(question.answer_number.to_string()))?;
            option_truth(option_texts[idx])?.map(|b| Some(Verdict::from_bool(b)))
        }
        AnswerNumber::Unparsed(_) => {
            return Err(CodecError::Decoding(question.answer_number.to_string()))
        }
    };

    // Every option must decode, not only the selected one
    for text in &option_texts {
        option_truth(text)?;
    }

    Ok(PromptUnits::new(question, verdicts))
}

/// Expand with the layout configured for the subject
pub fn expand_with_layout(
    question: &ExamQuestion,
    layout: QuestionLayout,
) -> Result<PromptUnits<'_>, CodecError> {
    match layout {
        QuestionLayout::FixedKey => expand(question),
        QuestionLayout::OptionDerived => expand_with_options(question),
    }
}

/// Truth vector named by an option text such as "アウ"
pub(crate) fn option_truth(text: &str) -> Result<[bool; 4], CodecError> {
    let truth = Slot::ALL.map(|slot| text.contains(slot.marker()));
    let count = truth.iter().filter(|b| **b).count();
    if count != 2 {
        return Err(CodecError::Decoding(format!(
            "option {:?} names {} statements, expected 2",
            text, count
        )));
    }
    Ok(truth)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::fixtures::question;
    use crate::questions::{OptionCell, Subject};

    fn verdicts(units: PromptUnits<'_>) -> Vec<Option<Verdict>> {
        units.map(|u| u.expected).collect()
    }

    #[test]
    fn test_expand_answer_three() {
        let q = question(Subject::Audit, "R3", "3");
        let units: Vec<_> = expand(&q).unwrap().collect();
        assert_eq!(units.len(), 4);
        assert_eq!(
            units.iter().map(|u| u.expected).collect::<Vec<_>>(),
            vec![
                Some(Verdict::True),
                Some(Verdict::False),
                Some(Verdict::False),
                Some(Verdict::True)
            ]
        );
        assert_eq!(units[0].slot, Slot::A);
        assert_eq!(units[3].slot, Slot::D);
        assert_eq!(units[1].text, format!("{}\n記述イ", q.question));
    }

    #[test]
    fn test_expand_sentinel_yields_unknowns() {
        let q = question(Subject::Audit, "R3", "-");
        assert_eq!(verdicts(expand(&q).unwrap()), vec![None; 4]);
    }

    #[test]
    fn test_expand_out_of_range_fails() {
        let q = question(Subject::Audit, "R3", "7");
        assert!(matches!(expand(&q), Err(CodecError::Decoding(_))));
    }

    #[test]
    fn test_units_are_restartable() {
        let q = question(Subject::Audit, "R3", "5");
        let mut units = expand(&q).unwrap();
        let first = units.next().unwrap();
        let restarted: Vec<_> = expand(&q).unwrap().collect();
        assert_eq!(restarted[0], first);
        assert_eq!(units.len(), 3);
        assert_eq!(units.clone().count(), 3);
        assert_eq!(units.count(), 3);
    }

    #[test]
    fn test_option_layout_agrees_with_fixed_key_for_standard_order() {
        for n in 1..=6 {
            let q = question(Subject::CoAct, "R2_1", &n.to_string());
            assert_eq!(
                verdicts(expand_with_options(&q).unwrap()),
                verdicts(expand(&q).unwrap()),
                "answer {}",
                n
            );
        }
    }

    #[test]
    fn test_option_layout_reads_reordered_options() {
        let mut q = question(Subject::CoAct, "R2_1", "1");
        q.options[0] = OptionCell::Text("ウエ".to_string());
        q.options[5] = OptionCell::Text("アイ".to_string());
        assert_eq!(
            verdicts(expand_with_options(&q).unwrap()),
            vec![
                Some(Verdict::False),
                Some(Verdict::False),
                Some(Verdict::True),
                Some(Verdict::True)
            ]
        );
    }

    #[test]
    fn test_option_layout_rejects_non_text_options() {
        let mut q = question(Subject::CoAct, "R2_1", "2");
        q.options[5] = OptionCell::Blank;
        assert!(matches!(expand_with_options(&q), Err(CodecError::FormatMismatch(_))));

        q.options[5] = OptionCell::Numeric(6.0);
        assert!(matches!(expand_with_options(&q), Err(CodecError::FormatMismatch(_))));
    }

    #[test]
    fn test_option_layout_rejects_bad_option_text() {
        let mut q = question(Subject::CoAct, "R2_1", "2");
        q.options[3] = OptionCell::Text("アイウ".to_string());
        assert!(matches!(expand_with_options(&q), Err(CodecError::Decoding(_))));
    }
}
