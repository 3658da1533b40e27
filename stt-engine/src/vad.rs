//! The VAD port (spec S4.2, C2). Concrete detectors live in adapter
//! crates (e.g. `stt-vad`); the engine only ever sees this trait.
//!
//! VAD is advisory, never authoritative (spec S9): if it disagrees with
//! the recognizer about where a word lies, the recognizer wins. VAD only
//! chooses where to trim.

/// Whether a window of audio was classified as speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Speech,
    Silence,
}

/// One classified window, relative to the start of the audio passed to
/// `classify`. Intervals returned by a single `classify` call are
/// contiguous and cover the input exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInterval {
    pub start_s: f64,
    pub end_s: f64,
    pub kind: VoiceKind,
}

impl VoiceInterval {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// Capability contract for a voice activity detector.
///
/// Implementations must merge silence intervals shorter than
/// `min_silence_s` into adjacent speech before returning, per spec
/// S4.2. A failing/disabled detector should behave as a single `Speech`
/// interval spanning the whole input, never return an error.
pub trait VoiceActivityDetector: Send {
    fn classify(&mut self, audio: &[f32], sample_rate: u32, min_silence_s: f64) -> Vec<VoiceInterval>;
}

/// The null detector: always reports the whole window as speech. Used
/// when `--vad off`, or as the fallback when a real detector is absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSpeech;

impl VoiceActivityDetector for AlwaysSpeech {
    fn classify(&mut self, audio: &[f32], sample_rate: u32, _min_silence_s: f64) -> Vec<VoiceInterval> {
        let end_s = audio.len() as f64 / sample_rate as f64;
        vec![VoiceInterval {
            start_s: 0.0,
            end_s,
            kind: VoiceKind::Speech,
        }]
    }
}

/// Find the latest silence interval `[s, e]` with `e <= safe_until_s`
/// and `e - s >= min_silence_s`, if any - the VAD-boundary trim
/// preference from spec S4.3.4 step 2.
pub fn latest_eligible_silence_end(
    intervals: &[VoiceInterval],
    safe_until_s: f64,
    min_silence_s: f64,
) -> Option<f64> {
    intervals
        .iter()
        .filter(|iv| {
            iv.kind == VoiceKind::Silence && iv.end_s <= safe_until_s && iv.duration_s() >= min_silence_s
        })
        .map(|iv| iv.end_s)
        .fold(None, |acc, e| Some(acc.map_or(e, |a: f64| a.max(e))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_speech_spans_whole_input() {
        let mut vad = AlwaysSpeech;
        let audio = vec![0.0f32; 16_000];
        let intervals = vad.classify(&audio, 16_000, 0.5);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].kind, VoiceKind::Speech);
        assert_eq!(intervals[0].end_s, 1.0);
    }

    #[test]
    fn picks_latest_eligible_silence() {
        let intervals = vec![
            VoiceInterval { start_s: 0.0, end_s: 1.0, kind: VoiceKind::Speech },
            VoiceInterval { start_s: 1.0, end_s: 1.6, kind: VoiceKind::Silence },
            VoiceInterval { start_s: 1.6, end_s: 3.0, kind: VoiceKind::Speech },
            VoiceInterval { start_s: 3.0, end_s: 3.7, kind: VoiceKind::Silence },
        ];
        let cut = latest_eligible_silence_end(&intervals, 3.7, 0.5);
        assert_eq!(cut, Some(3.7));
    }

    #[test]
    fn ignores_silence_past_safe_until() {
        let intervals = vec![VoiceInterval {
            start_s: 5.0,
            end_s: 6.0,
            kind: VoiceKind::Silence,
        }];
        assert_eq!(latest_eligible_silence_end(&intervals, 4.0, 0.5), None);
    }

    #[test]
    fn ignores_silence_shorter_than_min() {
        let intervals = vec![VoiceInterval {
            start_s: 1.0,
            end_s: 1.2,
            kind: VoiceKind::Silence,
        }];
        assert_eq!(latest_eligible_silence_end(&intervals, 2.0, 0.5), None);
    }
}
