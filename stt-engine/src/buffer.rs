//! The sliding audio buffer (spec S3 `AudioBuffer`).

/// Ordered samples plus the absolute session time of sample 0.
///
/// Invariant: `absolute_time(i) = buffer_time_offset + i / sample_rate`.
/// Only the engine mutates this; trimming drops leading samples and
/// advances `buffer_time_offset` atomically so the invariant never
/// observably breaks mid-call.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    buffer_time_offset: f64,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            buffer_time_offset: 0.0,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_time_offset(&self) -> f64 {
        self.buffer_time_offset
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn len_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn end_time_s(&self) -> f64 {
        self.buffer_time_offset + self.len_s()
    }

    pub fn absolute_time(&self, sample_index: usize) -> f64 {
        self.buffer_time_offset + sample_index as f64 / self.sample_rate as f64
    }

    /// Append samples. Non-blocking, no recognition side effect.
    pub fn insert(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Drop every sample with absolute time < `cut_at_s`, advancing
    /// `buffer_time_offset` to `cut_at_s`. No-op if `cut_at_s` is at or
    /// before the current offset.
    pub fn trim_to(&mut self, cut_at_s: f64) {
        if cut_at_s <= self.buffer_time_offset {
            return;
        }
        let drop_s = cut_at_s - self.buffer_time_offset;
        let drop_samples = ((drop_s * self.sample_rate as f64).round() as usize)
            .min(self.samples.len());
        self.samples.drain(0..drop_samples);
        self.buffer_time_offset = cut_at_s;
    }
}
