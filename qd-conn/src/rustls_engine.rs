//! `rustls`-backed [`TlsEngine`]: the default engine a real endpoint wires
//! into [`TlsAdapter`], using `rustls`'s own "quic" feature rather than
//! hand-rolling TLS 1.3 record/handshake parsing.
//!
//! `rustls`'s QUIC integration deliberately never exposes raw traffic
//! secrets — it hands back ready-to-use sealing/opening key objects
//! instead (the same shape `quinn-proto` consumes them in). That doesn't
//! fit [`TlsEngine::pending_secrets`]'s raw-byte `LevelSecrets` contract,
//! so this engine leaves that method returning nothing and instead
//! surfaces each [`rustls::quic::KeyChange`] through
//! [`RustlsEngine::take_key_change`] for the packet-protection layer to
//! consume directly; see `DESIGN.md` for why the trait itself hasn't been
//! reshaped to match.

use crate::tls::{CryptoSend, LevelSecrets, TlsEngine, TlsError};
use qd_base::space::EncryptionLevel;
use rustls::quic::{ClientConnection, KeyChange, ServerConnection, Version};
use rustls::{ClientConfig, Error as RustlsError, ServerConfig, ServerName};
use std::collections::VecDeque;
use std::sync::Arc;

enum Inner {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Inner {
    fn is_handshaking(&self) -> bool {
        match self {
            Inner::Client(c) => c.is_handshaking(),
            Inner::Server(s) => s.is_handshaking(),
        }
    }

    fn read_hs(&mut self, data: &[u8]) -> Result<(), RustlsError> {
        match self {
            Inner::Client(c) => c.read_hs(data),
            Inner::Server(s) => s.read_hs(data),
        }
    }

    fn write_hs(&mut self, buf: &mut Vec<u8>) -> Option<KeyChange> {
        match self {
            Inner::Client(c) => c.write_hs(buf),
            Inner::Server(s) => s.write_hs(buf),
        }
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Inner::Client(c) => c.alpn_protocol(),
            Inner::Server(s) => s.alpn_protocol(),
        }
    }

    fn is_handshake_confirmed(&self) -> bool {
        !self.is_handshaking()
    }
}

/// Wraps either side of a `rustls` QUIC handshake. Built once per
/// connection from its endpoint's shared `ClientConfig`/`ServerConfig`.
pub struct RustlsEngine {
    inner: Inner,
    outbox: VecDeque<CryptoSend>,
    key_changes: VecDeque<(EncryptionLevel, KeyChange)>,
    /// The level `write_hs` output is currently tagged with. Starts at
    /// Initial and advances only when `write_hs` itself reports a
    /// [`KeyChange`] — `rustls` doesn't take a level parameter on
    /// `read_hs`/`write_hs`; it tracks the handshake's current level
    /// internally and the caller infers transitions from `KeyChange`.
    send_level: EncryptionLevel,
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("is_handshaking", &self.inner.is_handshaking())
            .finish()
    }
}

impl RustlsEngine {
    /// Builds the client side, dialing `server_name` and advertising
    /// `transport_parameters` (the encoded local `TransportParameters`)
    /// via the QUIC extension.
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName,
        transport_parameters: Vec<u8>,
    ) -> Result<Self, TlsError> {
        let conn = ClientConnection::new(config, Version::V1, server_name, transport_parameters)
            .map_err(|e| TlsError::Handshake(e.to_string()))?;
        Ok(RustlsEngine {
            inner: Inner::Client(conn),
            outbox: VecDeque::new(),
            key_changes: VecDeque::new(),
            send_level: EncryptionLevel::Initial,
        })
    }

    /// Builds the server side.
    pub fn server(config: Arc<ServerConfig>, transport_parameters: Vec<u8>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config, Version::V1, transport_parameters)
            .map_err(|e| TlsError::Handshake(e.to_string()))?;
        Ok(RustlsEngine {
            inner: Inner::Server(conn),
            outbox: VecDeque::new(),
            key_changes: VecDeque::new(),
            send_level: EncryptionLevel::Initial,
        })
    }

    /// Hands back the next key change `rustls` produced (Initial → 1-RTT
    /// keying material transitions), for the packet-protection layer to
    /// install — see the module-level note on why this isn't folded into
    /// [`TlsEngine::pending_secrets`].
    pub fn take_key_change(&mut self) -> Option<(EncryptionLevel, KeyChange)> {
        self.key_changes.pop_front()
    }

    fn drain_handshake_output(&mut self) {
        loop {
            let mut buf = Vec::new();
            let key_change = self.inner.write_hs(&mut buf);
            let produced_bytes = !buf.is_empty();
            if produced_bytes {
                self.outbox.push_back(CryptoSend {
                    level: self.send_level,
                    data: buf,
                });
            }
            match key_change {
                Some(change) => {
                    let established_level = match &change {
                        KeyChange::Handshake { .. } => EncryptionLevel::Handshake,
                        KeyChange::OneRtt { .. } => EncryptionLevel::OneRtt,
                    };
                    self.send_level = established_level;
                    self.key_changes.push_back((established_level, change));
                }
                None => {
                    if !produced_bytes {
                        break;
                    }
                }
            }
        }
    }
}

impl TlsEngine for RustlsEngine {
    fn is_handshaking(&self) -> bool {
        self.inner.is_handshaking()
    }

    fn process_handshake_bytes(&mut self, _level: EncryptionLevel, data: &[u8]) -> Result<(), TlsError> {
        // `rustls::quic::{Client,Server}Connection::read_hs` is level-agnostic:
        // the level is implied by the handshake's current state, which
        // `TlsAdapter` has already reassembled `data` up to by CRYPTO-frame
        // space. Only `drain_handshake_output`'s own `send_level` tracking
        // decides what level outgoing bytes are tagged with.
        self.inner
            .read_hs(data)
            .map_err(|e| TlsError::Handshake(e.to_string()))?;
        self.drain_handshake_output();
        Ok(())
    }

    fn pending_sends(&mut self) -> Vec<CryptoSend> {
        self.outbox.drain(..).collect()
    }

    fn pending_secrets(&mut self) -> Vec<LevelSecrets> {
        // See the module doc: `rustls` exports key objects, not raw
        // secrets, through `take_key_change` instead.
        Vec::new()
    }

    fn alpn_selected(&self) -> Option<&str> {
        self.inner.alpn_protocol().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    fn is_handshake_confirmed(&self) -> bool {
        self.inner.is_handshake_confirmed()
    }
}
// No unit tests here: exercising `read_hs`/`write_hs` needs a live
// client/server handshake pair built from real certificates, which belongs
// to an integration test alongside endpoint setup rather than this
// module. `TlsAdapter`'s own tests (`tls.rs`) cover the CRYPTO-frame
// reassembly and level-sequencing contract this engine plugs into, against
// a fake engine.
