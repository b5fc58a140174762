//! TLS 1.3 adapter: bridges the QUIC connection to a TLS library via the
//! "quic" extension contract (level-tagged handshake bytes in, level-tagged
//! secrets out).

use qd_base::space::EncryptionLevel;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("alpn mismatch: no_application_protocol")]
    NoApplicationProtocol,
    #[error("initial_source_connection_id mismatch")]
    SourceCidMismatch,
    #[error("original_destination_connection_id mismatch")]
    OriginalDcidMismatch,
}

/// One set of directional keys for an encryption level, as exported by the
/// TLS library's QUIC keying-material interface.
#[derive(Debug, Clone)]
pub struct LevelSecrets {
    pub level: EncryptionLevel,
    pub read_secret: Vec<u8>,
    pub write_secret: Vec<u8>,
}

/// Handshake bytes the adapter wants transmitted in a CRYPTO frame at a
/// given level.
#[derive(Debug, Clone)]
pub struct CryptoSend {
    pub level: EncryptionLevel,
    pub data: Vec<u8>,
}

/// Per-level reassembly of inbound CRYPTO frames before handing contiguous
/// bytes to the TLS library, mirroring the stream reassembler's contract
/// but scoped to the handshake's single implicit stream per level.
#[derive(Debug, Default)]
struct CryptoRecvBuffer {
    next_offset: u64,
    pending: std::collections::BTreeMap<u64, Vec<u8>>,
    ready: Vec<u8>,
}

impl CryptoRecvBuffer {
    fn insert(&mut self, offset: u64, data: &[u8]) {
        if offset + data.len() as u64 <= self.next_offset {
            return;
        }
        let (offset, data) = if offset < self.next_offset {
            let skip = (self.next_offset - offset) as usize;
            (self.next_offset, data[skip..].to_vec())
        } else {
            (offset, data.to_vec())
        };
        self.pending.insert(offset, data);
        loop {
            let Some((&off, _)) = self.pending.iter().next() else { break };
            if off > self.next_offset {
                break;
            }
            let chunk = self.pending.remove(&off).unwrap();
            let skip = (self.next_offset - off) as usize;
            self.ready.extend_from_slice(&chunk[skip..]);
            self.next_offset += (chunk.len() - skip) as u64;
        }
    }

    fn take_ready(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.ready)
    }
}

/// Trait seam to the concrete TLS library (implemented against `rustls`'s
/// QUIC support in a real endpoint). Kept abstract here so connection logic
/// never depends on a specific TLS crate directly.
pub trait TlsEngine: std::fmt::Debug + Send {
    fn is_handshaking(&self) -> bool;
    fn process_handshake_bytes(&mut self, level: EncryptionLevel, data: &[u8])
        -> Result<(), TlsError>;
    fn pending_sends(&mut self) -> Vec<CryptoSend>;
    fn pending_secrets(&mut self) -> Vec<LevelSecrets>;
    fn alpn_selected(&self) -> Option<&str>;
    fn is_handshake_confirmed(&self) -> bool;
}

/// Owns per-level CRYPTO reassembly and forwards contiguous handshake bytes
/// to the underlying [`TlsEngine`]; forwards the engine's outgoing bytes and
/// derived secrets back to the connection.
#[derive(Debug)]
pub struct TlsAdapter<E: TlsEngine> {
    engine: E,
    recv: [CryptoRecvBuffer; 3],
    outbox: VecDeque<CryptoSend>,
}

fn level_index(level: EncryptionLevel) -> usize {
    match level {
        EncryptionLevel::Initial => 0,
        EncryptionLevel::Handshake => 1,
        EncryptionLevel::ZeroRtt | EncryptionLevel::OneRtt => 2,
    }
}

impl<E: TlsEngine> TlsAdapter<E> {
    pub fn new(engine: E) -> Self {
        TlsAdapter {
            engine,
            recv: Default::default(),
            outbox: VecDeque::new(),
        }
    }

    pub fn on_crypto_frame(
        &mut self,
        level: EncryptionLevel,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TlsError> {
        self.recv[level_index(level)].insert(offset, data);
        let ready = self.recv[level_index(level)].take_ready();
        if !ready.is_empty() {
            self.engine.process_handshake_bytes(level, &ready)?;
        }
        for send in self.engine.pending_sends() {
            self.outbox.push_back(send);
        }
        Ok(())
    }

    pub fn drain_outgoing(&mut self) -> Vec<CryptoSend> {
        self.outbox.drain(..).collect()
    }

    pub fn poll_secrets(&mut self) -> Vec<LevelSecrets> {
        self.engine.pending_secrets()
    }

    pub fn is_handshake_confirmed(&self) -> bool {
        self.engine.is_handshake_confirmed()
    }

    pub fn alpn_selected(&self) -> Option<&str> {
        self.engine.alpn_selected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct FakeEngine {
        seen: Vec<u8>,
        confirmed: bool,
    }

    impl TlsEngine for FakeEngine {
        fn is_handshaking(&self) -> bool {
            !self.confirmed
        }

        fn process_handshake_bytes(
            &mut self,
            _level: EncryptionLevel,
            data: &[u8],
        ) -> Result<(), TlsError> {
            self.seen.extend_from_slice(data);
            if self.seen.len() >= 4 {
                self.confirmed = true;
            }
            Ok(())
        }

        fn pending_sends(&mut self) -> Vec<CryptoSend> {
            Vec::new()
        }

        fn pending_secrets(&mut self) -> Vec<LevelSecrets> {
            Vec::new()
        }

        fn alpn_selected(&self) -> Option<&str> {
            Some("h3")
        }

        fn is_handshake_confirmed(&self) -> bool {
            self.confirmed
        }
    }

    #[test]
    fn crypto_reassembly_handles_out_of_order_frames() {
        let mut adapter = TlsAdapter::new(FakeEngine::default());
        adapter
            .on_crypto_frame(EncryptionLevel::Initial, 2, b"cd")
            .unwrap();
        assert!(!adapter.is_handshake_confirmed());
        adapter
            .on_crypto_frame(EncryptionLevel::Initial, 0, b"ab")
            .unwrap();
        assert!(adapter.is_handshake_confirmed());
        assert_eq!(adapter.engine.seen, b"abcd");
    }

    #[test]
    fn alpn_selected_surfaces_from_engine() {
        let adapter = TlsAdapter::new(FakeEngine::default());
        assert_eq!(adapter.alpn_selected(), Some("h3"));
    }
}
