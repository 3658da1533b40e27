//! Online ASR reconciliation engine (spec S4.3, component C4).
//!
//! This crate is the specified core: the audio buffer, the committed
//! transcript, the LocalAgreement-2 hypothesis reconciliation algorithm,
//! the VAD-driven trim policy, and the `Recognizer`/`VoiceActivityDetector`
//! port traits that adapter crates (`stt-recognizer`, `stt-vad`)
//! implement. It has no knowledge of sockets, sessions, or wire formats -
//! those live in `stt-server`.

mod buffer;
mod committed;
mod engine;
mod error;
mod hypothesis;
mod recognizer;
mod vad;
mod word;

pub use buffer::AudioBuffer;
pub use committed::CommittedTranscript;
pub use engine::{DEGRADED_CUT_TAIL_S, Engine, EngineConfig, MAX_PROMPT_CHARS, TrimmingMode};
pub use error::EngineError;
pub use hypothesis::HypothesisBuffer;
pub use recognizer::{Recognizer, RecognizerError};
pub use vad::{AlwaysSpeech, VoiceActivityDetector, VoiceInterval, VoiceKind, latest_eligible_silence_end};
pub use word::{Hypothesis, MATCH_START_TOLERANCE_S, Word, words_match};
