//! The working state between recognizer calls (spec S3 `HypothesisBuffer`)
//! and the LocalAgreement-2 reconciliation step (spec S4.3.3).

use crate::word::{Word, words_match};

/// Words from the most recent hypothesis that lie after the committed
/// tail but have not yet been confirmed by a second agreeing call.
#[derive(Debug, Clone, Default)]
pub struct HypothesisBuffer {
    buffer: Vec<Word>,
}

impl HypothesisBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &[Word] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Reconcile a freshly produced, absolute-time-mapped hypothesis
    /// against the previous call's unconfirmed tail. Returns the words
    /// newly committed this call (the maximum contiguous matching
    /// prefix, with the newer hypothesis's casing); replaces the
    /// internal buffer with the unmatched remainder of `hyp_raw`.
    pub fn reconcile(&mut self, hyp_raw: Vec<Word>) -> Vec<Word> {
        let agree_len = self
            .buffer
            .iter()
            .zip(hyp_raw.iter())
            .take_while(|(prev, new)| words_match(prev, new))
            .count();

        let mut new_buffer = hyp_raw;
        let committed: Vec<Word> = new_buffer.drain(0..agree_len).collect();
        self.buffer = new_buffer;
        committed
    }

    /// Discard any entries fully behind `cut_at_s` - called after a
    /// buffer trim (spec S4.3.4 step 4).
    pub fn trim(&mut self, cut_at_s: f64) {
        self.buffer.retain(|w| w.end_s > cut_at_s);
    }

    /// Take every remaining word unconditionally - used by `finish()`,
    /// where no second opinion is possible anymore.
    pub fn flush(&mut self) -> Vec<Word> {
        std::mem::take(&mut self.buffer)
    }
}
