//! TCP accept loop and per-connection protocol sniffer. Kept
//! interface-level: the listener hands off a classified connection to a
//! caller-supplied handler rather than implementing HTTP/1.1 or HTTP/2
//! itself.

use crate::detect::{detect_protocol, Protocol};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;

/// Accumulates bytes off one freshly accepted TCP connection until
/// [`detect::detect_protocol`] can classify it.
#[derive(Debug, Default)]
pub struct Sniffer {
    buf: Vec<u8>,
}

impl Sniffer {
    pub fn new() -> Self {
        Sniffer::default()
    }

    /// Appends newly read bytes and re-runs detection. Returns `None` until
    /// enough bytes have arrived to classify the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<Protocol> {
        self.buf.extend_from_slice(bytes);
        detect_protocol(&self.buf)
    }

    /// The bytes buffered so far — a handler that needs to replay the
    /// sniffed prefix (e.g. an HTTP/1.1 request line) reads this before
    /// continuing from the live socket.
    pub fn sniffed_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Which port accepted this connection, and over which scheme — the
/// listener binds both an HTTP and an HTTPS port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Http,
    Https,
}

pub struct UpgradeListener {
    listener: TcpListener,
    kind: ListenerKind,
    token: Token,
}

impl UpgradeListener {
    pub fn bind(addr: SocketAddr, kind: ListenerKind, token: Token) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!(%addr, ?kind, "upgrade front-end listening");
        Ok(UpgradeListener { listener, kind, token })
    }

    pub fn register(&mut self, poll: &Poll) -> io::Result<()> {
        poll.registry()
            .register(&mut self.listener, self.token, Interest::READABLE)
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Accepts every connection currently pending; `mio`'s listener is
    /// edge-triggered, so the caller must drain it until `WouldBlock`.
    pub fn accept_all(&self) -> io::Result<Vec<(TcpStream, SocketAddr)>> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    tracing::debug!(%peer_addr, kind = ?self.kind, "accepted connection");
                    accepted.push((stream, peer_addr));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }
}

/// Polls both the HTTP and HTTPS listeners and returns the set of tokens
/// ready to `accept_all`. A thin wrapper so callers don't need to hold
/// `Events` storage themselves.
pub fn poll_listeners(poll: &mut Poll, events: &mut Events) -> io::Result<Vec<Token>> {
    poll.poll(events, None)?;
    Ok(events.iter().map(|e| e.token()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffer_classifies_once_a_full_request_line_arrives() {
        let mut sniffer = Sniffer::new();
        assert_eq!(sniffer.feed(b"GET / HTTP/1"), None);
        assert_eq!(
            sniffer.feed(b".1\r\nHost: example.com\r\n\r\n"),
            Some(Protocol::Http1)
        );
    }

    #[test]
    fn sniffer_retains_bytes_fed_before_classification() {
        let mut sniffer = Sniffer::new();
        sniffer.feed(b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(sniffer.sniffed_bytes(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn listener_binds_and_reports_its_kind() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = UpgradeListener::bind(addr, ListenerKind::Http, Token(7)).unwrap();
        assert_eq!(listener.kind(), ListenerKind::Http);
        assert_eq!(listener.token(), Token(7));
    }
}
