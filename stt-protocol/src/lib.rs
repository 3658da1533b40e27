//! Wire-level constants and framing for the streaming transcription server.
//!
//! This crate owns exactly the two edges of the system that touch raw
//! bytes: decoding the inbound 16-bit PCM audio stream (C1) and encoding
//! outbound transcription records for either transport (C6). It knows
//! nothing about sessions, engines, or recognizers.

use serde::{Deserialize, Serialize};

/// The engine's working sample rate. Every backend is expected to accept
/// (or be fed pre-resampled) audio at this rate.
pub const SAMPLE_RATE: u32 = 16_000;

/// PCM samples are 16-bit signed integers; this is the divisor used to
/// normalize them into the engine's `f32` working unit.
pub const PCM_FULL_SCALE: f32 = 32_768.0;

/// Decode a little-endian 16-bit signed PCM byte slice into normalized
/// `f32` samples in `[-1, 1]`. A trailing odd byte (a split sample) is
/// silently dropped here - see [`PcmDecoder`] for the stateful version
/// used by the session reader, which carries it over instead.
pub fn decode_pcm_i16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / PCM_FULL_SCALE)
        .collect()
}

/// Stateful PCM decoder that tolerates byte chunks which split a sample
/// across two `read()` calls - the wire format places no constraint on
/// chunk size ("any chunk size >= 1 sample accepted").
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning any newly completed samples.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut buf: Vec<u8> = Vec::with_capacity(bytes.len() + 1);
        if let Some(lo) = self.carry.take() {
            buf.push(lo);
        }
        buf.extend_from_slice(bytes);

        if buf.len() % 2 == 1 {
            self.carry = buf.pop();
        }

        decode_pcm_i16le(&buf)
    }
}

/// One committed transcription batch, in absolute session time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(rename = "start")]
    pub start_ms: i64,
    #[serde(rename = "end")]
    pub end_ms: i64,
    pub text: String,
}

/// The terminal error record shape, shared by both transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: String,
}

/// Everything the server can write back to a WebSocket client. Untagged:
/// the wire shape is exactly `{"start":.., "end":.., "text":..}` or
/// `{"error":".."}`, with no envelope `"type"` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Transcription(OutputRecord),
    Error(ErrorRecord),
}

/// Format one record as a raw-TCP line: `<start_ms> <end_ms> <text>\n`.
/// `text` is written byte-for-byte, no JSON escaping.
pub fn encode_tcp_line(record: &OutputRecord) -> String {
    format!("{} {} {}\n", record.start_ms, record.end_ms, record.text)
}

/// Format the raw-TCP terminal error line: `# error <kind>\n`.
pub fn encode_tcp_error(kind: &str) -> String {
    format!("# error {kind}\n")
}

/// Serialize a [`ServerMessage`] as a single-line JSON text for the
/// WebSocket transport.
pub fn encode_ws_message(message: &ServerMessage) -> String {
    serde_json::to_string(message).expect("ServerMessage always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_scale_extremes() {
        let bytes = i16::MIN.to_le_bytes();
        let samples = decode_pcm_i16le(&bytes);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn decodes_silence() {
        let bytes = [0u8, 0, 0, 0];
        let samples = decode_pcm_i16le(&bytes);
        assert_eq!(samples, vec![0.0, 0.0]);
    }

    #[test]
    fn carries_split_sample_across_pushes() {
        let mut decoder = PcmDecoder::new();
        let sample: i16 = 12345;
        let bytes = sample.to_le_bytes();

        let first = decoder.push(&bytes[..1]);
        assert!(first.is_empty());

        let second = decoder.push(&bytes[1..]);
        assert_eq!(second.len(), 1);
        assert!((second[0] - (sample as f32 / PCM_FULL_SCALE)).abs() < 1e-6);
    }

    #[test]
    fn tcp_line_has_no_escaping() {
        let rec = OutputRecord {
            start_ms: 100,
            end_ms: 200,
            text: " hello \"world\"".to_string(),
        };
        assert_eq!(encode_tcp_line(&rec), "100 200  hello \"world\"\n");
    }

    #[test]
    fn ws_message_uses_short_field_names() {
        let rec = ServerMessage::Transcription(OutputRecord {
            start_ms: 0,
            end_ms: 10,
            text: "hi".to_string(),
        });
        let json = encode_ws_message(&rec);
        assert_eq!(json, r#"{"start":0,"end":10,"text":"hi"}"#);
    }

    #[test]
    fn error_message_round_trips() {
        let rec = ServerMessage::Error(ErrorRecord {
            error: "recognizer_unavailable".to_string(),
        });
        let json = encode_ws_message(&rec);
        assert_eq!(json, r#"{"error":"recognizer_unavailable"}"#);
    }
}
