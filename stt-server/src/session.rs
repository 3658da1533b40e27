//! Session (C5): owns one client connection. Drives [`Engine`] on the
//! cadence from spec S4.4 (tick on `min_chunk_s` of fresh audio, or on
//! `max_wait_s` of wall time), and serializes its output through one of
//! the two C6 wire encodings.
//!
//! Grounded in the teacher's single-task `handle_connection` drain loop
//! (`transcriber/src/main.rs`), generalized into an explicit
//! reader-task / ticker-task split per spec S5's concurrency model so
//! the recognizer's `spawn_blocking` call never stalls the socket read.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use stt_engine::{Engine, EngineError, Word};
use stt_protocol::{
    ErrorRecord, OutputRecord, PcmDecoder, SAMPLE_RATE, ServerMessage, encode_tcp_error,
    encode_tcp_line, encode_ws_message,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{info, warn};

const READ_CHUNK_BYTES: usize = 4096;
const QUEUE_CAPACITY: usize = 64;
const KEEPALIVE_S: f64 = 30.0;

enum InboundAudio {
    Chunk(Vec<u8>),
    Eof,
}

/// Where a session writes its output records. One implementation per
/// transport (raw-TCP line, WebSocket JSON); the ticking loop below is
/// written once against this trait.
trait OutputSink: Send {
    async fn send_record(&mut self, record: &OutputRecord) -> std::io::Result<()>;
    async fn send_error(&mut self, kind: &str) -> std::io::Result<()>;
    async fn send_keepalive(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    async fn close(&mut self) -> std::io::Result<()>;
}

struct TcpSink {
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl OutputSink for TcpSink {
    async fn send_record(&mut self, record: &OutputRecord) -> std::io::Result<()> {
        self.writer.write_all(encode_tcp_line(record).as_bytes()).await
    }

    async fn send_error(&mut self, kind: &str) -> std::io::Result<()> {
        self.writer.write_all(encode_tcp_error(kind).as_bytes()).await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

struct WsSink {
    sender: futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
}

fn ws_err(e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

impl OutputSink for WsSink {
    async fn send_record(&mut self, record: &OutputRecord) -> std::io::Result<()> {
        let json = encode_ws_message(&ServerMessage::Transcription(record.clone()));
        self.sender.send(Message::Text(json)).await.map_err(ws_err)
    }

    async fn send_error(&mut self, kind: &str) -> std::io::Result<()> {
        let json = encode_ws_message(&ServerMessage::Error(ErrorRecord { error: kind.to_string() }));
        self.sender.send(Message::Text(json)).await.map_err(ws_err)
    }

    async fn send_keepalive(&mut self) -> std::io::Result<()> {
        self.sender.send(Message::Ping(Vec::new())).await.map_err(ws_err)
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.sender.send(Message::Close(None)).await.map_err(ws_err)
    }
}

/// Check the raw-TCP auth handshake alone, without building or driving
/// a session - so a caller can gate recognizer setup on it instead of
/// discovering a bad token only after the backend has already been
/// spun up. Returns `true` if authenticated (or no token is
/// configured); on `false` the client has not been responded to yet,
/// it's the caller's job to close the connection (see
/// [`reject_with_error`]).
///
/// The wire format has no control channel of its own, so when a shared
/// token is configured the client must open with one ASCII line,
/// `TOKEN <token>\n`, before any PCM bytes - the only place this
/// transport has to put one.
pub async fn authenticate_tcp(stream: &mut TcpStream, expected_token: Option<&str>) -> bool {
    let Some(expected) = expected_token else {
        return true;
    };
    matches!(read_token_line(stream).await, Ok(got) if got == expected)
}

/// Run the raw-TCP variant of a session: PCM bytes in, `\n`-delimited
/// text lines out.
pub async fn run_tcp_session(mut stream: TcpStream, engine: Engine, min_chunk_s: f64, expected_token: Option<&str>) {
    if !authenticate_tcp(&mut stream, expected_token).await {
        let (_reader, writer) = stream.into_split();
        let mut sink = TcpSink { writer };
        let _ = sink.send_error("Unauthorized").await;
        let _ = sink.close().await;
        return;
    }

    drive_tcp(stream, engine, min_chunk_s).await;
}

/// Drive an already-authenticated raw-TCP connection. Split out so a
/// caller can authenticate, then create the recognizer, then only
/// build and drive the `Engine` once both have succeeded.
pub async fn drive_tcp(stream: TcpStream, engine: Engine, min_chunk_s: f64) {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(tcp_reader(reader, tx));
    let sink = TcpSink { writer };
    drive(engine, min_chunk_s, rx, sink).await;
}

/// Perform the WebSocket upgrade handshake, checking the bearer token
/// (an `Authorization: Bearer <token>` header, when configured) as
/// part of it. `Ok(None)` means the handshake itself already rejected
/// the client - tungstenite wrote the HTTP error response as part of
/// the upgrade exchange, so there is nothing left to send and the
/// caller should just drop the connection.
pub async fn accept_websocket(
    stream: TcpStream,
    expected_token: Option<&str>,
) -> Result<Option<WebSocketStream<TcpStream>>, tokio_tungstenite::tungstenite::Error> {
    match accept_with_token(stream, expected_token).await {
        Ok(s) => Ok(Some(s)),
        Err(tokio_tungstenite::tungstenite::Error::Http(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run the WebSocket variant of a session: binary audio frames in, one
/// JSON text message per record out.
pub async fn run_websocket_session(
    stream: TcpStream,
    engine: Engine,
    min_chunk_s: f64,
    expected_token: Option<&str>,
) -> anyhow::Result<()> {
    match accept_websocket(stream, expected_token).await {
        Ok(Some(ws_stream)) => {
            drive_websocket(ws_stream, engine, min_chunk_s).await;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            warn!("websocket handshake rejected: {e}");
            Ok(())
        }
    }
}

/// Drive an already-established (and, if required, already-
/// authenticated) WebSocket stream.
pub async fn drive_websocket(ws_stream: WebSocketStream<TcpStream>, engine: Engine, min_chunk_s: f64) {
    let (ws_sender, ws_receiver) = ws_stream.split();
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(ws_reader(ws_receiver, tx));
    let sink = WsSink { sender: ws_sender };
    drive(engine, min_chunk_s, rx, sink).await;
}

/// Send one terminal error record over an already-established
/// WebSocket stream, then close - used when the recognizer backend
/// fails to initialize after a successful (and possibly
/// token-authenticated) handshake, so the rejection still reaches the
/// client instead of silently dropping the connection.
pub async fn reject_established_websocket(ws_stream: WebSocketStream<TcpStream>, kind: &str) -> anyhow::Result<()> {
    let (sender, _receiver) = ws_stream.split();
    let mut sink = WsSink { sender };
    let _ = sink.send_error(kind).await;
    let _ = sink.close().await;
    Ok(())
}

/// Read one line, byte at a time, directly off the still-unsplit
/// socket. A `BufReader` would over-read into its own buffer and
/// silently swallow the PCM bytes that follow; reading one byte per
/// syscall here avoids that at the cost of a few extra reads on a path
/// that runs once per connection.
async fn read_token_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 512 {
            break;
        }
    }
    let text = String::from_utf8_lossy(&line);
    Ok(text
        .trim_end_matches('\r')
        .strip_prefix("TOKEN ")
        .unwrap_or("")
        .to_string())
}

async fn accept_with_token(
    stream: TcpStream,
    expected_token: Option<&str>,
) -> Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    let expected = expected_token.map(|s| s.to_string());
    let callback = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(expected) = &expected else {
            return Ok(response);
        };
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {expected}"))
            .unwrap_or(false);
        if authorized {
            Ok(response)
        } else {
            Err(ErrorResponse::new(Some("missing or invalid bearer token".to_string())))
        }
    };
    tokio_tungstenite::accept_hdr_async(stream, callback).await
}

/// Accept the connection far enough to speak its transport, then emit a
/// single terminal error record and close - used when the recognizer
/// backend itself failed to initialize (spec S8 "backend down" scenario:
/// the server still accepts the socket and closes cleanly).
pub async fn reject_with_error(
    stream: TcpStream,
    protocol: crate::protocol_detect::Protocol,
    kind: &str,
) -> anyhow::Result<()> {
    match protocol {
        crate::protocol_detect::Protocol::RawPcm => {
            let (_reader, writer) = stream.into_split();
            let mut sink = TcpSink { writer };
            let _ = sink.send_error(kind).await;
            let _ = sink.close().await;
        }
        crate::protocol_detect::Protocol::WebSocket => {
            let ws_stream = tokio_tungstenite::accept_async(stream).await?;
            let (sender, _receiver) = ws_stream.split();
            let mut sink = WsSink { sender };
            let _ = sink.send_error(kind).await;
            let _ = sink.close().await;
        }
    }
    Ok(())
}

async fn tcp_reader(mut reader: tokio::net::tcp::OwnedReadHalf, tx: mpsc::Sender<InboundAudio>) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => {
                let _ = tx.send(InboundAudio::Eof).await;
                return;
            }
            Ok(n) => {
                if tx.send(InboundAudio::Chunk(buf[..n].to_vec())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn ws_reader(
    mut receiver: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    tx: mpsc::Sender<InboundAudio>,
) {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => {
                if tx.send(InboundAudio::Chunk(data.into())).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = tx.send(InboundAudio::Eof).await;
                return;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_))) => {
                // control/text frames carry no audio; the keepalive ping
                // this server itself sends is answered by the client's
                // websocket library, not by us.
            }
            Some(Err(_)) => {
                let _ = tx.send(InboundAudio::Eof).await;
                return;
            }
        }
    }
}

/// The shared ticking loop (spec S4.4): accumulate audio, run
/// `process_iter` on the cadence, forward committed words as one
/// output record each. Identical for both transports once bytes have
/// become an `InboundAudio` stream and a sink.
async fn drive<S: OutputSink>(
    mut engine: Engine,
    min_chunk_s: f64,
    mut rx: mpsc::Receiver<InboundAudio>,
    mut sink: S,
) {
    let max_wait = Duration::from_secs_f64(3.0);
    let keepalive = Duration::from_secs_f64(KEEPALIVE_S);

    let mut decoder = PcmDecoder::new();
    let mut last_tick = Instant::now();
    let mut last_traffic = Instant::now();
    let mut samples_since_tick: usize = 0;

    loop {
        let since_tick = last_tick.elapsed();
        let since_traffic = last_traffic.elapsed();
        let wait_for_tick = max_wait.saturating_sub(since_tick);
        let wait_for_keepalive = keepalive.saturating_sub(since_traffic);
        let wait = wait_for_tick.min(wait_for_keepalive);

        let mut eof = false;
        match timeout(wait, rx.recv()).await {
            Ok(Some(InboundAudio::Chunk(bytes))) => {
                last_traffic = Instant::now();
                let samples = decoder.push(&bytes);
                samples_since_tick += samples.len();
                engine.insert_audio(&samples);
            }
            Ok(Some(InboundAudio::Eof)) | Ok(None) => eof = true,
            Err(_elapsed) => {
                if last_traffic.elapsed() >= keepalive {
                    last_traffic = Instant::now();
                    if sink.send_keepalive().await.is_err() {
                        break;
                    }
                }
            }
        }

        if eof {
            let (returned, result) = run_finish(engine).await;
            engine = returned;
            match result {
                Ok(words) => {
                    if let Some(record) = words_to_record(&words) {
                        let _ = sink.send_record(&record).await;
                    }
                }
                Err(e) => {
                    let _ = sink.send_error(e.kind()).await;
                }
            }
            break;
        }

        let chunk_ready = samples_since_tick as f64 / SAMPLE_RATE as f64 >= min_chunk_s;
        let waited_long_enough = last_tick.elapsed() >= max_wait && samples_since_tick > 0;

        if chunk_ready || waited_long_enough {
            last_tick = Instant::now();
            samples_since_tick = 0;
            let (returned, result) = run_process_iter(engine).await;
            engine = returned;
            match result {
                Ok(words) => {
                    if let Some(record) = words_to_record(&words) {
                        if sink.send_record(&record).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = sink.send_error(e.kind()).await;
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    info!("session ended");
}

async fn run_process_iter(engine: Engine) -> (Engine, Result<Vec<Word>, EngineError>) {
    tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let result = engine.process_iter();
        (engine, result)
    })
    .await
    .expect("engine ticker task panicked")
}

async fn run_finish(engine: Engine) -> (Engine, Result<Vec<Word>, EngineError>) {
    tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let result = engine.finish();
        (engine, result)
    })
    .await
    .expect("engine finish task panicked")
}

/// Fold a batch of newly committed words into the one output record
/// the wire format allows per tick (spec S6: `text` is the
/// concatenation of the batch's words with their original spacing).
fn words_to_record(words: &[Word]) -> Option<OutputRecord> {
    let first = words.first()?;
    let last = words.last()?;
    let text: String = words.iter().map(|w| w.text.as_str()).collect();
    Some(OutputRecord {
        start_ms: (first.start_s * 1000.0).round() as i64,
        end_ms: (last.end_s * 1000.0).round() as i64,
        text,
    })
}
