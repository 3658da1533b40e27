//! `earshot`-backed adapter for `stt_engine::VoiceActivityDetector`
//! (spec S4.2, component C2). Grounded in the teacher's frame-by-frame
//! `Vad` wrapper, generalized into the engine's `classify(audio)`
//! contract: reduce per-16ms speech probabilities into contiguous
//! speech/silence intervals, merging any silence shorter than
//! `min_silence_s` into its neighbors.

use earshot::Detector;
use stt_engine::{VoiceActivityDetector, VoiceInterval, VoiceKind};

/// earshot operates natively on 16ms frames.
const FRAME_MS: f64 = 16.0;

/// Probability at or above this is classified as speech.
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.5;

/// A fresh `Detector` per `classify` call - earshot's model is stateless
/// across frames aside from the frame buffer itself, so recomputing from
/// the start of the given window on every call (rather than carrying
/// state across engine ticks) keeps this adapter simple and matches how
/// the engine re-VADs its whole live buffer after every trim.
pub struct EarshotVad {
    threshold: f32,
}

impl Default for EarshotVad {
    fn default() -> Self {
        Self::new()
    }
}

impl EarshotVad {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_SPEECH_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    fn frame_probabilities(&self, audio: &[f32], sample_rate: u32) -> (Vec<f32>, f64) {
        let frame_samples = ((sample_rate as f64) * FRAME_MS / 1000.0).round().max(1.0) as usize;
        let frame_s = frame_samples as f64 / sample_rate as f64;

        let samples_i16: Vec<i16> = audio
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();

        let mut detector = Detector::default();
        let mut probabilities = Vec::with_capacity(samples_i16.len() / frame_samples + 1);

        let mut chunks = samples_i16.chunks_exact(frame_samples);
        for chunk in chunks.by_ref() {
            probabilities.push(detector.predict_i16(chunk));
        }
        let remainder = chunks.remainder();
        if !remainder.is_empty() {
            let mut padded = remainder.to_vec();
            padded.resize(frame_samples, 0);
            probabilities.push(detector.predict_i16(&padded));
        }

        (probabilities, frame_s)
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn classify(&mut self, audio: &[f32], sample_rate: u32, min_silence_s: f64) -> Vec<VoiceInterval> {
        if audio.is_empty() {
            return Vec::new();
        }

        let (probabilities, frame_s) = self.frame_probabilities(audio, sample_rate);
        let total_s = audio.len() as f64 / sample_rate as f64;

        let mut intervals = Vec::new();
        for (i, &p) in probabilities.iter().enumerate() {
            let start_s = i as f64 * frame_s;
            let end_s = if i + 1 == probabilities.len() {
                total_s
            } else {
                (i + 1) as f64 * frame_s
            };
            let kind = if p >= self.threshold {
                VoiceKind::Speech
            } else {
                VoiceKind::Silence
            };

            match intervals.last_mut() {
                Some(VoiceInterval { end_s: prev_end, kind: prev_kind, .. }) if *prev_kind == kind => {
                    *prev_end = end_s;
                }
                _ => intervals.push(VoiceInterval { start_s, end_s, kind }),
            }
        }

        merge_short_silences(intervals, min_silence_s)
    }
}

/// Merge every silence interval shorter than `min_silence_s` into its
/// speech neighbor(s) (spec S4.2). Runs to a fixed point since merging
/// can cascade (two short silences separated by a now-absorbed gap).
fn merge_short_silences(mut intervals: Vec<VoiceInterval>, min_silence_s: f64) -> Vec<VoiceInterval> {
    loop {
        let mut merged_any = false;
        let mut result: Vec<VoiceInterval> = Vec::with_capacity(intervals.len());
        let mut i = 0;
        while i < intervals.len() {
            let cur = intervals[i].clone();
            let is_short_silence = cur.kind == VoiceKind::Silence && cur.duration_s() < min_silence_s;
            let prev_is_speech = result.last().map(|r| r.kind == VoiceKind::Speech).unwrap_or(false);
            let next_is_speech = intervals.get(i + 1).map(|n| n.kind == VoiceKind::Speech).unwrap_or(false);

            if is_short_silence && (prev_is_speech || next_is_speech) {
                merged_any = true;
                let mut end_s = cur.end_s;
                let mut advance = 1;
                if next_is_speech {
                    end_s = intervals[i + 1].end_s;
                    advance = 2;
                }
                if prev_is_speech {
                    result.last_mut().unwrap().end_s = end_s;
                } else {
                    result.push(VoiceInterval {
                        start_s: cur.start_s,
                        end_s,
                        kind: VoiceKind::Speech,
                    });
                }
                i += advance;
                continue;
            }

            result.push(cur);
            i += 1;
        }
        intervals = result;
        if !merged_any {
            break;
        }
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(len_samples: usize) -> Vec<f32> {
        vec![0.0; len_samples]
    }

    fn loud_tone(len_samples: usize) -> Vec<f32> {
        (0..len_samples)
            .map(|i| ((i as f32) * 0.3).sin())
            .collect()
    }

    #[test]
    fn empty_audio_yields_no_intervals() {
        let mut vad = EarshotVad::new();
        assert!(vad.classify(&[], 16_000, 0.5).is_empty());
    }

    #[test]
    fn intervals_are_contiguous_and_cover_the_input() {
        let mut vad = EarshotVad::new();
        let audio = loud_tone(16_000);
        let intervals = vad.classify(&audio, 16_000, 0.5);
        assert_eq!(intervals.first().unwrap().start_s, 0.0);
        let total = audio.len() as f64 / 16_000.0;
        assert!((intervals.last().unwrap().end_s - total).abs() < 1e-9);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
    }

    #[test]
    fn merges_short_silences_into_speech() {
        let intervals = vec![
            VoiceInterval { start_s: 0.0, end_s: 1.0, kind: VoiceKind::Speech },
            VoiceInterval { start_s: 1.0, end_s: 1.2, kind: VoiceKind::Silence },
            VoiceInterval { start_s: 1.2, end_s: 2.0, kind: VoiceKind::Speech },
        ];
        let merged = merge_short_silences(intervals, 0.5);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, VoiceKind::Speech);
        assert_eq!(merged[0].start_s, 0.0);
        assert_eq!(merged[0].end_s, 2.0);
    }

    #[test]
    fn keeps_silence_at_least_min_duration() {
        let intervals = vec![
            VoiceInterval { start_s: 0.0, end_s: 1.0, kind: VoiceKind::Speech },
            VoiceInterval { start_s: 1.0, end_s: 2.0, kind: VoiceKind::Silence },
            VoiceInterval { start_s: 2.0, end_s: 3.0, kind: VoiceKind::Speech },
        ];
        let merged = merge_short_silences(intervals, 0.5);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].kind, VoiceKind::Silence);
    }

    #[test]
    fn pure_silence_has_no_speech_neighbor_to_absorb_into() {
        let mut vad = EarshotVad::new();
        let audio = silence(16_000);
        let intervals = vad.classify(&audio, 16_000, 0.5);
        assert!(intervals.iter().all(|iv| iv.kind == VoiceKind::Silence));
    }
}
