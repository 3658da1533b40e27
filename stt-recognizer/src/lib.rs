//! `whisper-rs`-backed adapter implementing `stt_engine::Recognizer`
//! (spec S4.1, component C3). Grounded in the teacher's `Session`
//! wrapper: same `FullParams` setter sequence, same token-level
//! extraction via `token_data()`/`token_id()`/`token_probability()`,
//! generalized from the teacher's opus/segment-stream model into the
//! engine's one-shot "whole window in, one hypothesis out" contract.

mod words;

use std::sync::Arc;

use stt_engine::{Hypothesis, Recognizer, RecognizerError};
use thiserror::Error;
use tracing::{info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperError,
    WhisperState,
};

use words::{TokenInfo, words_from_tokens};

/// Failures that can only happen while standing up the backend, not on
/// a per-utterance basis - these always end the process, never a
/// single session.
#[derive(Debug, Error)]
pub enum WhisperBackendError {
    #[error("failed to load whisper model at {path}: {source}")]
    ModelLoad { path: String, source: WhisperError },
    #[error("failed to create whisper inference state: {0}")]
    StateInit(WhisperError),
}

/// Decoding knobs the teacher exposed as CLI/session options; carried
/// through unchanged since they tune whisper's own search, not anything
/// this crate's reconciliation logic depends on.
#[derive(Clone, Debug, Default)]
pub struct TranscribeOpts {
    pub dynamic_audio_ctx: bool,
    pub temperature_inc: Option<f32>,
    pub entropy_thold: Option<f32>,
    pub reinit_state: bool,
}

const SAMPLE_RATE: u32 = 16_000;

/// Loads a whisper model once and hands out a fresh [`WhisperRecognizer`]
/// (with its own decoding state) per session, mirroring how the teacher
/// shared one `Arc<WhisperContext>` across many `Session`s.
pub struct WhisperRecognizerFactory {
    ctx: Arc<WhisperContext>,
}

impl WhisperRecognizerFactory {
    pub fn load(model_path: &str, use_gpu: bool) -> Result<Self, WhisperBackendError> {
        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu);
        params.flash_attn(use_gpu);

        let ctx = WhisperContext::new_with_params(model_path, params).map_err(|source| {
            WhisperBackendError::ModelLoad {
                path: model_path.to_string(),
                source,
            }
        })?;

        info!(model = model_path, use_gpu, "loaded whisper model");
        Ok(Self { ctx: Arc::new(ctx) })
    }

    pub fn create_recognizer(
        &self,
        sampling_strategy: SamplingStrategy,
        opts: TranscribeOpts,
    ) -> Result<WhisperRecognizer, WhisperBackendError> {
        let state = self
            .ctx
            .create_state()
            .map_err(WhisperBackendError::StateInit)?;

        Ok(WhisperRecognizer {
            ctx: self.ctx.clone(),
            state,
            sampling_strategy,
            opts,
        })
    }
}

/// One session's whisper inference state. Not `Clone` or `Sync` -
/// callers (the engine, via `spawn_blocking`) own exactly one of these
/// per live connection.
pub struct WhisperRecognizer {
    ctx: Arc<WhisperContext>,
    state: WhisperState,
    sampling_strategy: SamplingStrategy,
    opts: TranscribeOpts,
}

impl Recognizer for WhisperRecognizer {
    fn transcribe(
        &mut self,
        audio: &[f32],
        prompt: &str,
        language: Option<&str>,
    ) -> Result<Hypothesis, RecognizerError> {
        if self.opts.reinit_state {
            self.state = self
                .ctx
                .create_state()
                .map_err(|e| RecognizerError::Transient(e.to_string()))?;
        }

        let mut params = FullParams::new(self.sampling_strategy.clone());
        params.set_language(language);
        params.set_suppress_nst(true);
        params.set_max_len(0);
        params.set_max_tokens(0);
        params.set_max_initial_ts(1.0);
        params.set_single_segment(false);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_token_timestamps(true);
        params.set_no_context(true);

        if let Some(v) = self.opts.temperature_inc {
            params.set_temperature_inc(v);
        }
        if let Some(v) = self.opts.entropy_thold {
            params.set_entropy_thold(v);
        }
        if self.opts.dynamic_audio_ctx {
            let needed = (audio.len() as i32 * 1500) / (SAMPLE_RATE as i32 * 30);
            let aligned = ((needed + 63) / 64) * 64;
            params.set_audio_ctx(aligned.max(384));
        }
        if !prompt.is_empty() {
            params.set_initial_prompt(prompt);
        }

        self.state
            .full(params, audio)
            .map_err(|e| RecognizerError::Transient(e.to_string()))?;

        let n_segments = self.state.full_n_segments();
        let eot_id = self.ctx.token_eot();
        let mut words = Vec::new();

        for i in 0..n_segments {
            let Some(segment) = self.state.get_segment(i) else {
                continue;
            };

            let segment_start_cs = segment.start_timestamp();
            let segment_end_cs = segment.end_timestamp();
            let n_tokens = segment.n_tokens();

            let mut tokens = Vec::with_capacity(n_tokens as usize);
            for j in 0..n_tokens {
                let Some(token) = segment.get_token(j) else {
                    continue;
                };
                let Ok(text) = token.to_str_lossy() else {
                    continue;
                };
                let token_data = token.token_data();
                tokens.push(TokenInfo {
                    text: text.to_string(),
                    t0_cs: token_data.t0,
                    t1_cs: token_data.t1,
                    special: token.token_id() >= eot_id,
                });
            }

            if segment.no_speech_probability() > 0.9 && tokens.iter().all(|t| t.special) {
                continue;
            }

            words.extend(words_from_tokens(&tokens, segment_start_cs, segment_end_cs));
        }

        if words.is_empty() {
            warn!("whisper returned no words for a {:.2}s window", audio.len() as f64 / SAMPLE_RATE as f64);
        }

        Ok(words)
    }

    fn preferred_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn max_audio_seconds(&self) -> f64 {
        30.0
    }

    fn supports_prompt(&self) -> bool {
        true
    }
}
