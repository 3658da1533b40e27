//! The `Word` data model (spec S3) and the normalization rules the
//! LocalAgreement matcher uses to compare hypotheses across calls.

/// A single timed token in absolute session time.
///
/// `text` may carry leading whitespace/punctuation exactly as emitted by
/// the recognizer - callers that want to reassemble running text should
/// concatenate `text` fields directly, never inserting their own
/// separators.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

impl Word {
    pub fn new(start_s: f64, end_s: f64, text: impl Into<String>) -> Self {
        Self {
            start_s,
            end_s,
            text: text.into(),
        }
    }

    /// Lowercased, punctuation/whitespace-trimmed form used only for the
    /// LocalAgreement text comparison - never for display.
    pub fn normalized(&self) -> String {
        self.text
            .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .to_lowercase()
    }
}

/// An ordered sequence of [`Word`]s returned by one recognizer call.
/// Word order is non-decreasing in `start_s`.
pub type Hypothesis = Vec<Word>;

/// Maximum allowed start-time skew for two words to be considered the
/// same occurrence during LocalAgreement matching (spec S4.3.3).
pub const MATCH_START_TOLERANCE_S: f64 = 0.5;

/// Whether two words refer to the same occurrence: same normalized text
/// and start times within [`MATCH_START_TOLERANCE_S`] of each other.
pub fn words_match(a: &Word, b: &Word) -> bool {
    (a.start_s - b.start_s).abs() <= MATCH_START_TOLERANCE_S && a.normalized() == b.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_punctuation() {
        let w = Word::new(0.0, 1.0, "  Hello, ".to_string());
        assert_eq!(w.normalized(), "hello");
    }

    #[test]
    fn matches_within_tolerance() {
        let a = Word::new(1.0, 1.4, "World".to_string());
        let b = Word::new(1.4, 1.8, "world.".to_string());
        assert!(words_match(&a, &b));
    }

    #[test]
    fn rejects_same_text_far_apart_start() {
        let a = Word::new(1.0, 1.4, "world".to_string());
        let b = Word::new(5.0, 5.4, "world".to_string());
        assert!(!words_match(&a, &b));
    }

    #[test]
    fn rejects_different_text() {
        let a = Word::new(1.0, 1.4, "world".to_string());
        let b = Word::new(1.0, 1.4, "word".to_string());
        assert!(!words_match(&a, &b));
    }
}
