//! The online ASR engine (spec S4.3, C4) - the specified core. Wires
//! together the audio buffer, the committed transcript, the LocalAgreement
//! hypothesis buffer, a recognizer, and an optional VAD gate, and exposes
//! exactly the three operations spec S4.3.1 names.

use crate::buffer::AudioBuffer;
use crate::committed::CommittedTranscript;
use crate::error::EngineError;
use crate::hypothesis::HypothesisBuffer;
use crate::recognizer::{Recognizer, RecognizerError};
use crate::vad::{AlwaysSpeech, VoiceActivityDetector, VoiceInterval, latest_eligible_silence_end};
use crate::word::Word;

/// Longest prompt, in characters, handed to the recognizer (spec S4.1:
/// "<= 200 characters is safe").
pub const MAX_PROMPT_CHARS: usize = 200;

/// Working tail left below the hard cap when a degraded mid-utterance
/// cut is forced (spec S4.3.4 step 2).
pub const DEGRADED_CUT_TAIL_S: f64 = 5.0;

/// `--buffer-trimming {segment,sentence}` (spec S6): whether the trim
/// policy consults VAD silence boundaries or relies purely on the
/// committed tail and the hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimmingMode {
    /// Prefer a VAD silence boundary; fall back to a degraded cut.
    Segment,
    /// Never consult VAD; only ever force the degraded cut.
    Sentence,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub hard_cap_s: f64,
    pub min_silence_s: f64,
    pub trimming: TrimmingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            hard_cap_s: 30.0,
            min_silence_s: 0.5,
            trimming: TrimmingMode::Segment,
        }
    }
}

/// The streaming reconciliation engine for a single session.
pub struct Engine {
    config: EngineConfig,
    buffer: AudioBuffer,
    committed: CommittedTranscript,
    hyp: HypothesisBuffer,
    vad: Box<dyn VoiceActivityDetector>,
    recognizer: Box<dyn Recognizer>,
    language: Option<String>,
    closed: bool,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        recognizer: Box<dyn Recognizer>,
        language: Option<String>,
    ) -> Self {
        Self::with_vad(config, recognizer, Box::new(AlwaysSpeech), language)
    }

    pub fn with_vad(
        config: EngineConfig,
        recognizer: Box<dyn Recognizer>,
        vad: Box<dyn VoiceActivityDetector>,
        language: Option<String>,
    ) -> Self {
        let sample_rate = config.sample_rate;
        Self {
            config,
            buffer: AudioBuffer::new(sample_rate),
            committed: CommittedTranscript::new(),
            hyp: HypothesisBuffer::new(),
            vad,
            recognizer,
            language,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffer_len_s(&self) -> f64 {
        self.buffer.len_s()
    }

    pub fn committed_words(&self) -> &[Word] {
        self.committed.words()
    }

    /// Append samples. Non-blocking, no recognition side effect (spec
    /// S4.3.1). Accepted even once the buffer is already at the hard
    /// cap - the next `process_iter` trims it; we never refuse audio,
    /// since a stalled reader would read as spurious client-side
    /// silence (spec S4.4 backpressure note).
    pub fn insert_audio(&mut self, samples: &[f32]) {
        self.buffer.insert(samples);
    }

    /// Recognize on the current buffer, reconcile, return any newly
    /// committed words.
    pub fn process_iter(&mut self) -> Result<Vec<Word>, EngineError> {
        if self.closed {
            return Err(EngineError::EngineClosed);
        }
        self.process_iter_inner()
    }

    /// Treat the buffer end as end-of-stream: run one last
    /// `process_iter`, then move every remaining hypothesis word to
    /// `committed` unconditionally (no second opinion is possible at
    /// end-of-stream), and close the engine.
    pub fn finish(&mut self) -> Result<Vec<Word>, EngineError> {
        if self.closed {
            return Err(EngineError::EngineClosed);
        }
        let mut newly_committed = self.process_iter_inner()?;

        let flushed = self.hyp.flush();
        if !flushed.is_empty() {
            self.committed.append(flushed.clone());
            newly_committed.extend(flushed);
        }
        self.closed = true;
        Ok(newly_committed)
    }

    fn process_iter_inner(&mut self) -> Result<Vec<Word>, EngineError> {
        if self.buffer.len_samples() == 0 {
            return Ok(Vec::new());
        }

        let prompt = self.committed.prompt(MAX_PROMPT_CHARS);
        let hyp_raw = match self.recognizer.transcribe(
            self.buffer.samples(),
            &prompt,
            self.language.as_deref(),
        ) {
            Ok(h) => h,
            Err(RecognizerError::Transient(reason)) => {
                tracing::debug!(reason = %reason, "recognizer call transient failure, no new words this tick");
                return Ok(Vec::new());
            }
            Err(RecognizerError::Unavailable(reason)) => {
                return Err(EngineError::RecognizerUnavailable(reason));
            }
        };

        let offset = self.buffer.buffer_time_offset();
        let last_committed_end = self.committed.last_end_s();
        let mapped: Vec<Word> = hyp_raw
            .into_iter()
            .map(|w| Word::new(w.start_s + offset, w.end_s + offset, w.text))
            .filter(|w| w.end_s > last_committed_end)
            .collect();

        let newly_committed = self.hyp.reconcile(mapped);
        if !newly_committed.is_empty() {
            self.committed.append(newly_committed.clone());
            tracing::debug!(
                n_words = newly_committed.len(),
                last_end_s = self.committed.last_end_s(),
                "committed new words"
            );
        }

        self.run_trim();

        Ok(newly_committed)
    }

    fn run_trim(&mut self) {
        let safe_until_s = self.committed.last_end_s();
        let earliest_uncommitted_start_s = self.hyp.buffer().first().map(|w| w.start_s);
        let intervals: Vec<VoiceInterval> = if self.config.trimming == TrimmingMode::Segment {
            self.vad
                .classify(self.buffer.samples(), self.buffer.sample_rate(), self.config.min_silence_s)
        } else {
            Vec::new()
        };

        let cut = compute_trim_cut(
            self.config.trimming,
            self.config.hard_cap_s,
            safe_until_s,
            earliest_uncommitted_start_s,
            self.buffer.buffer_time_offset(),
            self.buffer.len_s(),
            &intervals,
            self.config.min_silence_s,
        );

        if let Some(t) = cut {
            self.buffer.trim_to(t);
            self.hyp.trim(t);
        }
    }
}

/// The trim decision itself (spec S4.3.4), factored out so it can be
/// unit tested without a real recognizer or VAD.
///
/// `earliest_uncommitted_start_s` is the start time of the hypothesis
/// buffer's first (oldest) word, if any - the degraded cut must never
/// reach past it, since that word has not yet had a second chance to
/// agree and its audio is still needed. Bounding the degraded cut by
/// `safe_until_s` alone breaks down when nothing has ever been
/// committed: `safe_until_s` stays `0.0` forever, which would pin the
/// cut point to `0.0` and leave the buffer growing unbounded through a
/// long silent or never-agreeing session.
fn compute_trim_cut(
    trimming: TrimmingMode,
    hard_cap_s: f64,
    safe_until_s: f64,
    earliest_uncommitted_start_s: Option<f64>,
    buffer_time_offset: f64,
    buffer_len_s: f64,
    vad_intervals: &[VoiceInterval],
    min_silence_s: f64,
) -> Option<f64> {
    if trimming == TrimmingMode::Segment {
        if let Some(t) = latest_eligible_silence_end(vad_intervals, safe_until_s, min_silence_s) {
            return Some(t);
        }
    }

    if buffer_len_s > hard_cap_s {
        let hard_cap_cut = buffer_time_offset + hard_cap_s - DEGRADED_CUT_TAIL_S;
        let bound = earliest_uncommitted_start_s.unwrap_or(f64::INFINITY).max(safe_until_s);
        let t = bound.min(hard_cap_cut);
        if t > buffer_time_offset {
            tracing::warn!(cut_at_s = t, "forcing degraded mid-utterance buffer cut");
            return Some(t);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::VoiceKind;

    /// A recognizer test double: returns a fixed hypothesis (relative
    /// to the audio it's given) regardless of call count, so tests can
    /// drive the reconciliation state machine deterministically.
    struct ScriptedRecognizer {
        calls: std::vec::IntoIter<Result<Vec<Word>, RecognizerError>>,
    }

    impl ScriptedRecognizer {
        fn new(calls: Vec<Result<Vec<Word>, RecognizerError>>) -> Self {
            Self {
                calls: calls.into_iter(),
            }
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn transcribe(
            &mut self,
            _audio: &[f32],
            _prompt: &str,
            _language: Option<&str>,
        ) -> Result<Vec<Word>, RecognizerError> {
            self.calls
                .next()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    fn one_second_of_audio() -> Vec<f32> {
        vec![0.0f32; 16_000]
    }

    #[test]
    fn first_tick_never_commits() {
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![Word::new(0.0, 0.5, "hello")])]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        let committed = engine.process_iter().unwrap();
        assert!(committed.is_empty());
    }

    #[test]
    fn second_agreeing_tick_commits() {
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
            Ok(vec![Word::new(0.0, 0.5, "hello"), Word::new(0.5, 0.9, " world")]),
        ]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        engine.process_iter().unwrap();
        let committed = engine.process_iter().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].text, "hello");
    }

    #[test]
    fn identical_hypothesis_twice_does_not_double_commit() {
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
        ]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        let first = engine.process_iter().unwrap();
        let second = engine.process_iter().unwrap();
        let third = engine.process_iter().unwrap();
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert!(third.is_empty(), "no audio advanced, nothing new to agree on");
        assert_eq!(engine.committed_words().len(), 1);
    }

    #[test]
    fn transient_failure_yields_empty_tick_not_error() {
        let recognizer = ScriptedRecognizer::new(vec![Err(RecognizerError::Transient("timeout".into()))]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        let result = engine.process_iter().unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn unavailable_recognizer_is_an_error() {
        let recognizer = ScriptedRecognizer::new(vec![Err(RecognizerError::Unavailable("no model".into()))]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        let err = engine.process_iter().unwrap_err();
        assert_eq!(err.kind(), "RecognizerUnavailable");
    }

    #[test]
    fn finish_flushes_hypothesis_buffer_unconditionally() {
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![Word::new(0.0, 0.5, "hello")])]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        let flushed = engine.finish().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].text, "hello");
        assert!(engine.is_closed());
    }

    #[test]
    fn finish_on_zero_length_audio_is_empty() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        let flushed = engine.finish().unwrap();
        assert!(flushed.is_empty());
    }

    #[test]
    fn calling_after_finish_errors() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.finish().unwrap();
        let err = engine.process_iter().unwrap_err();
        assert_eq!(err.kind(), "EngineClosed");
    }

    #[test]
    fn trim_prefers_vad_silence_boundary() {
        let vad_intervals = vec![
            VoiceInterval { start_s: 0.0, end_s: 1.0, kind: VoiceKind::Speech },
            VoiceInterval { start_s: 1.0, end_s: 1.6, kind: VoiceKind::Silence },
        ];
        let cut = compute_trim_cut(TrimmingMode::Segment, 30.0, 1.6, None, 0.0, 1.6, &vad_intervals, 0.5);
        assert_eq!(cut, Some(1.6));
    }

    #[test]
    fn trim_falls_back_to_degraded_cut_past_hard_cap() {
        // safe_until_s is far ahead of the cap so the min() picks the
        // hard-cap-minus-tail branch, not the committed boundary.
        let cut = compute_trim_cut(TrimmingMode::Segment, 30.0, 100.0, None, 0.0, 31.0, &[], 0.5);
        assert_eq!(cut, Some(25.0));
    }

    #[test]
    fn sentence_mode_never_consults_vad() {
        let vad_intervals = vec![VoiceInterval { start_s: 0.0, end_s: 2.0, kind: VoiceKind::Silence }];
        let cut = compute_trim_cut(TrimmingMode::Sentence, 30.0, 2.0, None, 0.0, 10.0, &vad_intervals, 0.5);
        assert_eq!(cut, None, "sentence mode ignores VAD and the buffer is under the hard cap");
    }

    #[test]
    fn degraded_cut_is_not_pinned_to_zero_when_nothing_committed() {
        // Nothing has ever been committed (safe_until_s == 0.0) and the
        // hypothesis buffer is empty (no recognizer output at all, e.g.
        // sustained silence) - the degraded cut must still advance with
        // the hard cap instead of getting clamped to 0.0 forever.
        let cut = compute_trim_cut(TrimmingMode::Segment, 30.0, 0.0, None, 0.0, 31.0, &[], 0.5);
        assert_eq!(cut, Some(25.0));
    }

    #[test]
    fn degraded_cut_respects_earliest_uncommitted_word_when_nothing_committed() {
        // Nothing committed, but the hypothesis buffer holds an
        // unconfirmed word starting at 2.0s - the degraded cut must not
        // reach past it even though it's far short of the hard-cap cut.
        let cut = compute_trim_cut(TrimmingMode::Segment, 30.0, 0.0, Some(2.0), 0.0, 31.0, &[], 0.5);
        assert_eq!(cut, Some(2.0));
    }

    #[test]
    fn sustained_silence_never_grows_buffer_past_hard_cap_plus_slack() {
        let recognizer = ScriptedRecognizer::new((0..40).map(|_| Ok(Vec::new())).collect());
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        for _ in 0..40 {
            engine.insert_audio(&one_second_of_audio());
            engine.process_iter().unwrap();
        }
        assert!(
            engine.buffer_len_s() <= 30.0 + DEGRADED_CUT_TAIL_S + 1.0,
            "buffer grew unbounded through pure silence: {} s",
            engine.buffer_len_s()
        );
    }

    #[test]
    fn buffer_never_ahead_of_committed_after_trim() {
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
            Ok(vec![Word::new(0.0, 0.5, "hello")]),
        ]);
        let mut engine = Engine::new(EngineConfig::default(), Box::new(recognizer), None);
        engine.insert_audio(&one_second_of_audio());
        engine.process_iter().unwrap();
        engine.process_iter().unwrap();
        assert!(engine.buffer.buffer_time_offset() <= engine.committed.last_end_s() + 1e-9);
    }
}
