//! Library surface of the server binary, split out so the socket-level
//! integration tests under `tests/` can drive a real [`Session`] against
//! a stub recognizer without loading an actual whisper model.
//!
//! [`Session`]: session

pub mod protocol_detect;
pub mod session;
