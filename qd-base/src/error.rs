//! Transport error codes (RFC 9000 §20.1) and the crate-wide result alias.

use thiserror::Error;

/// Transport-level error codes carried in `CONNECTION_CLOSE` frames of type
/// `0x1c`, and returned internally when a packet or frame fails validation.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NoError = 0x00,
    InternalError = 0x01,
    ConnectionRefused = 0x02,
    FlowControlError = 0x03,
    StreamLimitError = 0x04,
    StreamStateError = 0x05,
    FinalSizeError = 0x06,
    FrameEncodingError = 0x07,
    TransportParameterError = 0x08,
    ConnectionIdLimitError = 0x09,
    ProtocolViolation = 0x0a,
    InvalidToken = 0x0b,
    ApplicationError = 0x0c,
    CryptoBufferExceeded = 0x0d,
    KeyUpdateError = 0x0e,
    AeadLimitReached = 0x0f,
    NoViablePath = 0x10,
    /// `CRYPTO_ERROR(0x100+tls_alert)`, the TLS alert is stashed in the field.
    CryptoError(u8),
}

impl TransportError {
    pub fn code(self) -> u64 {
        match self {
            TransportError::NoError => 0x00,
            TransportError::InternalError => 0x01,
            TransportError::ConnectionRefused => 0x02,
            TransportError::FlowControlError => 0x03,
            TransportError::StreamLimitError => 0x04,
            TransportError::StreamStateError => 0x05,
            TransportError::FinalSizeError => 0x06,
            TransportError::FrameEncodingError => 0x07,
            TransportError::TransportParameterError => 0x08,
            TransportError::ConnectionIdLimitError => 0x09,
            TransportError::ProtocolViolation => 0x0a,
            TransportError::InvalidToken => 0x0b,
            TransportError::ApplicationError => 0x0c,
            TransportError::CryptoBufferExceeded => 0x0d,
            TransportError::KeyUpdateError => 0x0e,
            TransportError::AeadLimitReached => 0x0f,
            TransportError::NoViablePath => 0x10,
            TransportError::CryptoError(alert) => 0x100 + alert as u64,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0x00 => TransportError::NoError,
            0x01 => TransportError::InternalError,
            0x02 => TransportError::ConnectionRefused,
            0x03 => TransportError::FlowControlError,
            0x04 => TransportError::StreamLimitError,
            0x05 => TransportError::StreamStateError,
            0x06 => TransportError::FinalSizeError,
            0x07 => TransportError::FrameEncodingError,
            0x08 => TransportError::TransportParameterError,
            0x09 => TransportError::ConnectionIdLimitError,
            0x0a => TransportError::ProtocolViolation,
            0x0b => TransportError::InvalidToken,
            0x0c => TransportError::ApplicationError,
            0x0d => TransportError::CryptoBufferExceeded,
            0x0e => TransportError::KeyUpdateError,
            0x0f => TransportError::AeadLimitReached,
            0x10 => TransportError::NoViablePath,
            0x100..=0x1ff => TransportError::CryptoError((code - 0x100) as u8),
            _ => return None,
        })
    }
}

/// Errors surfaced while decoding a single frame. A `FrameDecodeError` on a
/// packet's payload is a signal to drop the packet silently rather than to
/// close the connection, unless the caller has already established the
/// packet decrypted correctly, in which case it is promoted to a
/// `TransportError::FrameEncodingError` connection close (RFC 9000 §12.2).
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("buffer exhausted while decoding frame")]
    Truncated,
    #[error("varint overflow (value exceeds 2^62-1)")]
    VarIntOverflow,
    #[error("reserved bits set where RFC 9000 requires zero")]
    ReservedBitsSet,
    #[error("unknown frame type {0:#x}")]
    UnknownFrameType(u64),
    #[error("ack range underflowed below packet number zero")]
    AckRangeUnderflow,
}

#[derive(Debug, Error)]
pub enum PacketDecodeError {
    #[error("buffer too short for a packet header")]
    Truncated,
    #[error("unsupported QUIC version {0:#x}")]
    UnsupportedVersion(u32),
    #[error("connection ID length {0} exceeds the 20 byte maximum")]
    ConnectionIdTooLong(u8),
    #[error("header protection sample out of range")]
    BadSample,
    #[error("AEAD open failed (packet protection or packet number mismatch)")]
    AeadOpenFailed,
    #[error("frame decode failed: {0}")]
    Frame(#[from] FrameDecodeError),
}

/// The crate-wide result alias threaded through `qd-base`.
pub type Result<T> = std::result::Result<T, QuicError>;

#[derive(Debug, Error)]
pub enum QuicError {
    #[error("transport error {0:?}: {1}")]
    Transport(TransportError, String),
    #[error(transparent)]
    PacketDecode(#[from] PacketDecodeError),
    #[error(transparent)]
    FrameDecode(#[from] FrameDecodeError),
    #[error("invalid transport parameter: {0}")]
    TransportParameter(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuicError {
    pub fn transport(err: TransportError, message: impl Into<String>) -> Self {
        // workaround: the derive above can't reference a tuple-struct field by name,
        // so the Display impl indexes into a single-field helper instead.
        QuicError::Transport(err, message.into())
    }
}
