//! Answer-key table: answer number → truth value of each sub-statement

use super::codec::CodecError;
use super::{AnswerNumber, Slot, Verdict};

/// Fixed mapping from answer number (1–6) to the truth of slots A–D.
///
/// Every real answer number marks exactly two statements true. The `-` sentinel
/// maps to four unknown verdicts.
#[derive(Debug, Clone, Copy)]
pub struct AnswerKeyTable {
    rows: [[bool; 4]; 6],
}

/// The table used by the exam format
pub const ANSWER_KEY: AnswerKeyTable = AnswerKeyTable {
    rows: [
        [true, true, false, false],
        [true, false, true, false],
        [true, false, false, true],
        [false, true, true, false],
        [false, true, false, true],
        [false, false, true, true],
    ],
};

impl AnswerKeyTable {
    /// Valid answer numbers, in order
    pub fn keys(&self) -> impl Iterator<Item = u8> {
        1..=self.rows.len() as u8
    }

    /// Raw truth vector for an answer number, if it is in the table
    pub fn lookup(&self, answer: u8) -> Option<[bool; 4]> {
        let idx = usize::from(answer).checked_sub(1)?;
        self.rows.get(idx).copied()
    }

    /// Expected verdict for one slot
    pub fn verdict(&self, answer: &AnswerNumber, slot: Slot) -> Result<Option<Verdict>, CodecError> {
        Ok(self.row(answer)?[slot.index()])
    }

    /// Expected verdicts for all four slots
    pub fn row(&self, answer: &AnswerNumber) -> Result<[Option<Verdict>; 4], CodecError> {
        match answer {
            AnswerNumber::NoValidAnswer => Ok([None; 4]),
            AnswerNumber::Choice(n) => self
                .lookup(*n)
                .map(|row| row.map(|b| Some(Verdict::from_bool(b))))
                .ok_or_else(|| CodecError::Decoding(answer.to_string())),
            AnswerNumber::Unparsed(_) => Err(CodecError::Decoding(answer.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_has_exactly_two_true() {
        for key in ANSWER_KEY.keys() {
            let row = ANSWER_KEY.lookup(key).unwrap();
            assert_eq!(row.iter().filter(|b| **b).count(), 2, "answer {}", key);
        }
    }

    #[test]
    fn test_rows_are_distinct() {
        let rows: Vec<_> = ANSWER_KEY.keys().map(|k| ANSWER_KEY.lookup(k).unwrap()).collect();
        for (i, a) in rows.iter().enumerate() {
            for b in &rows[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_out_of_range_is_decoding_error() {
        assert!(ANSWER_KEY.lookup(0).is_none());
        assert!(ANSWER_KEY.lookup(7).is_none());
        assert!(matches!(
            ANSWER_KEY.row(&AnswerNumber::Choice(7)),
            Err(CodecError::Decoding(_))
        ));
        assert!(matches!(
            ANSWER_KEY.row(&AnswerNumber::Unparsed("abc".into())),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn test_sentinel_is_all_unknown() {
        assert_eq!(ANSWER_KEY.row(&AnswerNumber::NoValidAnswer).unwrap(), [None; 4]);
    }
}
