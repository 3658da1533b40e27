//! Protocol auto-detection (spec S4.5, S6, C7): sniff the first bytes of
//! a freshly accepted connection for an HTTP `Upgrade: websocket`
//! preamble, without consuming them - whichever transport turns out to
//! be in play still needs to see those same bytes (as the start of the
//! handshake, or as the first PCM samples).

use std::time::Duration;

use tokio::net::TcpStream;

const SNIFF_LIMIT: usize = 4096;
const SNIFF_RETRY_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    WebSocket,
    RawPcm,
}

/// Peek bytes until the HTTP header terminator `\r\n\r\n` appears or
/// [`SNIFF_LIMIT`] bytes have arrived, then check whether what's been
/// seen so far looks like an HTTP upgrade request naming `websocket`.
///
/// A client's upgrade preamble can land across more than one TCP
/// segment (a slow writer, an intervening proxy); peeking once at
/// accept time can observe only a partial `GET ...` line with no
/// `Upgrade:` header yet, which would permanently misclassify the
/// connection as raw PCM. `TcpStream::peek` does not remove bytes from
/// the kernel receive buffer, so whichever handler runs next still
/// reads everything seen here from the start.
pub async fn sniff(stream: &TcpStream) -> std::io::Result<Protocol> {
    let mut buf = vec![0u8; SNIFF_LIMIT];
    loop {
        let n = stream.peek(&mut buf).await?;
        let head = &buf[..n];

        if n == 0 {
            // Peer closed (or never sent anything) before any terminator
            // arrived - no websocket handshake is coming.
            return Ok(Protocol::RawPcm);
        }

        if contains_header_terminator(head) || n >= SNIFF_LIMIT {
            return if looks_like_websocket_upgrade(head) {
                Ok(Protocol::WebSocket)
            } else {
                Ok(Protocol::RawPcm)
            };
        }

        tokio::time::sleep(SNIFF_RETRY_INTERVAL).await;
    }
}

fn contains_header_terminator(head: &[u8]) -> bool {
    head.windows(4).any(|w| w == b"\r\n\r\n")
}

fn looks_like_websocket_upgrade(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    text.starts_with("get ") && text.contains("upgrade: websocket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_http_upgrade_preamble() {
        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        assert!(looks_like_websocket_upgrade(req));
    }

    #[test]
    fn raw_pcm_bytes_are_not_mistaken_for_http() {
        let pcm: Vec<u8> = vec![0x00, 0x01, 0x02, 0x03, 0xff, 0xfe];
        assert!(!looks_like_websocket_upgrade(&pcm));
    }

    #[test]
    fn case_insensitive_header_match() {
        let req = b"GET /ws HTTP/1.1\r\nUPGRADE: WebSocket\r\n\r\n";
        assert!(looks_like_websocket_upgrade(req));
    }
}
