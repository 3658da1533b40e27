//! The append-only committed transcript (spec S3 `CommittedTranscript`).

use crate::word::Word;

/// Words the engine has declared final. Once appended, a word is never
/// removed, reordered, or textually altered.
#[derive(Debug, Clone, Default)]
pub struct CommittedTranscript {
    words: Vec<Word>,
}

impl CommittedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn last_end_s(&self) -> f64 {
        self.words.last().map(|w| w.end_s).unwrap_or(0.0)
    }

    /// Append words, preserving monotonicity (caller must ensure they
    /// extend the existing tail; this type does not reorder).
    pub fn append(&mut self, mut new_words: Vec<Word>) {
        self.words.append(&mut new_words);
    }

    /// The textual prompt passed to the next recognizer call: the tail
    /// of the committed transcript, truncated to at most `max_chars`
    /// characters, preferring to cut at a whitespace boundary.
    pub fn prompt(&self, max_chars: usize) -> String {
        let full: String = self.words.iter().map(|w| w.text.as_str()).collect();
        if full.chars().count() <= max_chars {
            return full;
        }

        let total_chars = full.chars().count();
        let skip = total_chars - max_chars;
        let tail: String = full.chars().skip(skip).collect();

        match tail.find(char::is_whitespace) {
            Some(byte_idx) => tail[byte_idx..].trim_start().to_string(),
            None => tail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(start: f64, end: f64, text: &str) -> Word {
        Word::new(start, end, text)
    }

    #[test]
    fn prompt_returns_full_text_when_short() {
        let mut c = CommittedTranscript::new();
        c.append(vec![w(0.0, 0.5, "hello"), w(0.5, 1.0, " world")]);
        assert_eq!(c.prompt(200), "hello world");
    }

    #[test]
    fn prompt_truncates_to_whitespace_boundary() {
        let mut c = CommittedTranscript::new();
        c.append(vec![
            w(0.0, 0.5, "one"),
            w(0.5, 1.0, " two"),
            w(1.0, 1.5, " three"),
        ]);
        // "one two three" is 13 chars; ask for 7 -> tail "o three", cut to
        // the next whitespace boundary -> " three" trimmed -> "three".
        let prompt = c.prompt(7);
        assert!(prompt.ends_with("three"));
        assert!(!prompt.contains("one"));
    }

    #[test]
    fn last_end_s_defaults_to_zero() {
        let c = CommittedTranscript::new();
        assert_eq!(c.last_end_s(), 0.0);
    }

    #[test]
    fn append_is_monotonic_and_order_preserving() {
        let mut c = CommittedTranscript::new();
        c.append(vec![w(0.0, 1.0, "a")]);
        c.append(vec![w(1.0, 2.0, "b")]);
        assert_eq!(c.words().len(), 2);
        assert_eq!(c.words()[0].text, "a");
        assert_eq!(c.last_end_s(), 2.0);
    }
}
