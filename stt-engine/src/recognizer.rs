//! The recognizer port (spec S4.1, C3). Concrete backends live in
//! adapter crates (e.g. `stt-recognizer`'s `whisper-rs` implementation);
//! the engine only ever sees this trait.

use crate::word::Hypothesis;
use thiserror::Error;

/// Recognizer-side failures. A transient failure is the caller's (the
/// engine's) cue to treat the tick as "no new words", never to
/// propagate to the client; an unavailable backend ends the session.
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognizer backend unavailable: {0}")]
    Unavailable(String),
    #[error("recognizer call failed transiently: {0}")]
    Transient(String),
}

/// One pluggable speech recognizer capability.
///
/// `audio` is a contiguous window of 16 kHz mono `f32` samples (spec
/// S4.1 input constraints: 1s-30s). Word times in the returned
/// [`Hypothesis`] are relative to the start of `audio` - the adapter
/// does not and cannot know session time, only the engine does that
/// translation (spec S4.3.3 step 2).
pub trait Recognizer: Send {
    fn transcribe(
        &mut self,
        audio: &[f32],
        prompt: &str,
        language: Option<&str>,
    ) -> Result<Hypothesis, RecognizerError>;

    /// Sample rate this recognizer expects its `audio` argument at.
    fn preferred_sample_rate(&self) -> u32 {
        16_000
    }

    /// Longest audio window this recognizer accepts in one call.
    fn max_audio_seconds(&self) -> f64 {
        30.0
    }

    /// Whether `prompt` has any effect for this backend.
    fn supports_prompt(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::Word;

    struct Echo;
    impl Recognizer for Echo {
        fn transcribe(
            &mut self,
            audio: &[f32],
            _prompt: &str,
            _language: Option<&str>,
        ) -> Result<Hypothesis, RecognizerError> {
            Ok(vec![Word::new(0.0, audio.len() as f64 / 16_000.0, "echo")])
        }
    }

    #[test]
    fn default_capabilities_are_sane() {
        let echo = Echo;
        assert_eq!(echo.preferred_sample_rate(), 16_000);
        assert!(echo.max_audio_seconds() > 0.0);
        assert!(echo.supports_prompt());
    }
}
