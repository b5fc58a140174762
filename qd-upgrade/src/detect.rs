//! Protocol sniffing on a freshly accepted TCP connection: classify the
//! first bytes as HTTP/1.1, HTTP/2, or not-yet-known before any response
//! is sent. This is advisory, not a full parser: prefer direct HTTPS+ALPN
//! negotiation for HTTP/3 advertisement where possible, so detection only
//! needs to be good enough to pick a handler, not to validate the request.

pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// HTTP/2 frame header type byte for SETTINGS (RFC 9113 §6.5); a connection
/// preface is always followed by a SETTINGS frame, but some clients are
/// known to send the SETTINGS frame's header before enough of the preface
/// string has arrived, so the first-frame check also accepts this.
const HTTP2_FRAME_TYPE_SETTINGS: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
    Unknown,
}

/// Classifies `buf`, the bytes read so far from a new TCP connection.
/// Returns `None` when there isn't yet enough data to decide — the caller
/// should read more and retry rather than treating this as `Unknown`.
pub fn detect_protocol(buf: &[u8]) -> Option<Protocol> {
    if buf.len() >= HTTP2_PREFACE.len() {
        if buf.starts_with(HTTP2_PREFACE) {
            return Some(Protocol::Http2);
        }
    } else if HTTP2_PREFACE.starts_with(buf) {
        return None; // could still become the HTTP/2 preface
    }

    if looks_like_http2_settings_frame(buf) {
        return Some(Protocol::Http2);
    }

    match find_request_line_end(buf) {
        Some(end) if is_http1_request_line(&buf[..end]) => Some(Protocol::Http1),
        Some(_) => Some(Protocol::Unknown),
        None if buf.len() > 8192 => Some(Protocol::Unknown), // bound unbounded buffering
        None => None,
    }
}

fn looks_like_http2_settings_frame(buf: &[u8]) -> bool {
    // length(3) + type(1) + flags(1) + stream_id(4) == 9-byte frame header.
    if buf.len() < 4 {
        return false;
    }
    buf[3] == HTTP2_FRAME_TYPE_SETTINGS
}

fn find_request_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n").map(|p| p + 2)
}

fn is_http1_request_line(line: &[u8]) -> bool {
    let Ok(line) = std::str::from_utf8(line) else {
        return false;
    };
    let line = line.trim_end_matches("\r\n");
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(_target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    is_known_method(method) && (version == "HTTP/1.1" || version == "HTTP/1.0")
}

fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        "GET" | "HEAD" | "POST" | "PUT" | "DELETE" | "CONNECT" | "OPTIONS" | "TRACE" | "PATCH"
    )
}
