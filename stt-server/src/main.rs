use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use stt_engine::{Engine, EngineConfig, TrimmingMode};
use stt_recognizer::{TranscribeOpts, WhisperRecognizerFactory};
use stt_server::{protocol_detect, session};
use stt_vad::EarshotVad;
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;
use whisper_rs::SamplingStrategy;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TrimmingArg {
    Segment,
    Sentence,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum VadArg {
    On,
    Off,
}

/// Streaming speech-to-text server: accepts raw PCM or WebSocket audio
/// and emits a growing, never-retracted transcript.
#[derive(Parser, Debug)]
#[command(name = "stt-server")]
struct Args {
    #[arg(long, default_value = "[::]", help = "address to listen on")]
    host: String,

    #[arg(long, default_value_t = 8001, help = "port to listen on")]
    port: u16,

    #[arg(long, help = "path to whisper model file")]
    model: String,

    #[arg(long, help = "ISO language code, or omit for auto-detection")]
    language: Option<String>,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "seconds of new audio that trigger a recognizer tick"
    )]
    min_chunk_size: f64,

    #[arg(
        long,
        value_enum,
        default_value = "segment",
        help = "VAD-boundary-preferred vs. committed-only buffer trimming"
    )]
    buffer_trimming: TrimmingArg,

    #[arg(long, value_enum, default_value = "on", help = "enable the voice activity gate")]
    vad: VadArg,

    #[arg(long, help = "path to a file holding the shared bearer token")]
    token_file: Option<String>,

    #[arg(long, default_value_t = 30.0, help = "audio buffer hard cap, in seconds")]
    hard_cap: f64,

    #[arg(
        long,
        help = "best-of sampling width (mutually exclusive with --beam-size)",
        conflicts_with = "beam_size"
    )]
    best_of: Option<i32>,

    #[arg(
        long,
        help = "beam search width (mutually exclusive with --best-of)",
        conflicts_with = "best_of"
    )]
    beam_size: Option<i32>,

    #[arg(long, help = "scale whisper's audio_ctx to the buffer length")]
    dynamic_audio_ctx: bool,

    #[arg(long, help = "temperature increment on decode retry")]
    temperature_inc: Option<f32>,

    #[arg(long, help = "entropy threshold for decode retry")]
    entropy_thold: Option<f32>,

    #[arg(long, help = "reinitialize whisper state before every transcription")]
    reinit_state: bool,

    #[arg(long, help = "run inference on the GPU, if the backend was built with GPU support")]
    use_gpu: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address {}:{}: {e}", args.host, args.port);
            return ExitCode::from(1);
        }
    };

    info!(model = %args.model, "loading whisper model");
    let factory = match WhisperRecognizerFactory::load(&args.model, args.use_gpu) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!("failed to load recognizer backend: {e}");
            return ExitCode::from(2);
        }
    };

    let expected_token = match &args.token_file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => {
                info!("shared-token authentication enabled");
                Some(s.trim().to_string())
            }
            Err(e) => {
                error!("failed to read token file {path}: {e}");
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    let sampling_strategy = match (args.beam_size, args.best_of) {
        (Some(beam_size), None) => {
            info!(beam_size, "using beam search");
            SamplingStrategy::BeamSearch { beam_size, patience: -1.0 }
        }
        (None, Some(best_of)) => {
            info!(best_of, "using greedy search");
            SamplingStrategy::Greedy { best_of }
        }
        (None, None) => SamplingStrategy::Greedy { best_of: 1 },
        (Some(_), Some(_)) => unreachable!("clap enforces --best-of/--beam-size mutual exclusion"),
    };

    let transcribe_opts = TranscribeOpts {
        dynamic_audio_ctx: args.dynamic_audio_ctx,
        temperature_inc: args.temperature_inc,
        entropy_thold: args.entropy_thold,
        reinit_state: args.reinit_state,
    };

    let engine_config = EngineConfig {
        sample_rate: stt_protocol::SAMPLE_RATE,
        hard_cap_s: args.hard_cap,
        min_silence_s: 0.5,
        trimming: match args.buffer_trimming {
            TrimmingArg::Segment => TrimmingMode::Segment,
            TrimmingArg::Sentence => TrimmingMode::Sentence,
        },
    };
    let vad_enabled = matches!(args.vad, VadArg::On);
    let language = args.language.clone().filter(|l| !l.is_empty() && l != "auto");
    let min_chunk_s = args.min_chunk_size;

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::from(1);
        }
    };
    info!(%addr, "listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let conn_id = Uuid::new_v4();
        let span = tracing::info_span!("connection", %conn_id, %peer);
        info!(parent: &span, "connection accepted");

        let factory = factory.clone();
        let engine_config = engine_config.clone();
        let expected_token = expected_token.clone();
        let sampling_strategy = sampling_strategy.clone();
        let transcribe_opts = transcribe_opts.clone();
        let language = language.clone();

        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(
                    stream,
                    factory,
                    engine_config,
                    expected_token,
                    sampling_strategy,
                    transcribe_opts,
                    vad_enabled,
                    language,
                    min_chunk_s,
                )
                .await
                {
                    error!("connection error: {e}");
                }
            }
            .instrument(span),
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    mut stream: TcpStream,
    factory: Arc<WhisperRecognizerFactory>,
    engine_config: EngineConfig,
    expected_token: Option<String>,
    sampling_strategy: SamplingStrategy,
    transcribe_opts: TranscribeOpts,
    vad_enabled: bool,
    language: Option<String>,
    min_chunk_s: f64,
) -> anyhow::Result<()> {
    let protocol = protocol_detect::sniff(&stream).await?;

    // Authenticate before touching the recognizer backend at all - an
    // unauthenticated client must never learn whether the backend is up.
    match protocol {
        protocol_detect::Protocol::RawPcm => {
            if !session::authenticate_tcp(&mut stream, expected_token.as_deref()).await {
                return session::reject_with_error(stream, protocol, "Unauthorized").await;
            }

            let recognizer = match factory.create_recognizer(sampling_strategy, transcribe_opts) {
                Ok(r) => r,
                Err(e) => {
                    warn!("recognizer init failed: {e}");
                    return session::reject_with_error(stream, protocol, "RecognizerUnavailable").await;
                }
            };
            let engine = build_engine(engine_config, recognizer, vad_enabled, language);
            session::drive_tcp(stream, engine, min_chunk_s).await;
            Ok(())
        }
        protocol_detect::Protocol::WebSocket => {
            let ws_stream = match session::accept_websocket(stream, expected_token.as_deref()).await {
                Ok(Some(s)) => s,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("websocket handshake rejected: {e}");
                    return Ok(());
                }
            };

            let recognizer = match factory.create_recognizer(sampling_strategy, transcribe_opts) {
                Ok(r) => r,
                Err(e) => {
                    warn!("recognizer init failed: {e}");
                    return session::reject_established_websocket(ws_stream, "RecognizerUnavailable").await;
                }
            };
            let engine = build_engine(engine_config, recognizer, vad_enabled, language);
            session::drive_websocket(ws_stream, engine, min_chunk_s).await;
            Ok(())
        }
    }
}

fn build_engine(
    engine_config: EngineConfig,
    recognizer: stt_recognizer::WhisperRecognizer,
    vad_enabled: bool,
    language: Option<String>,
) -> Engine {
    if vad_enabled {
        Engine::with_vad(engine_config, Box::new(recognizer), Box::new(EarshotVad::new()), language)
    } else {
        Engine::new(engine_config, Box::new(recognizer), language)
    }
}
