//! The engine-level slice of the error taxonomy (spec S7). Transport and
//! decode failures are not engine concerns - they live in the session
//! layer (`stt-server`), which wraps `EngineError` into its own taxonomy
//! for the wire-level terminal record.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The recognizer backend cannot be reached or load its model.
    /// Ends the session with an error record; the server stays up.
    #[error("recognizer backend unavailable: {0}")]
    RecognizerUnavailable(String),

    /// Misuse: a call on an engine that already saw `finish()`. This is
    /// a programming error per spec S7 - callers should treat it as a
    /// bug, not a recoverable condition.
    #[error("engine used after finish()")]
    EngineClosed,
}

impl EngineError {
    /// The wire-level kind string used in the terminal error record.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::RecognizerUnavailable(_) => "RecognizerUnavailable",
            EngineError::EngineClosed => "EngineClosed",
        }
    }
}
