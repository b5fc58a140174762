//! HTTP/3 error codes (RFC 9114 §8) and the crate-wide result alias.

use thiserror::Error;

/// HTTP/3 error codes, carried in `STOP_SENDING`/`RESET_STREAM` (stream
/// errors) or `CONNECTION_CLOSE` (connection errors) on the underlying QUIC
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H3Error {
    NoError,
    GeneralProtocolError,
    InternalError,
    StreamCreationError,
    ClosedCriticalStream,
    FrameUnexpected,
    FrameError,
    ExcessiveLoad,
    IdError,
    SettingsError,
    MissingSettings,
    RequestRejected,
    RequestCancelled,
    RequestIncomplete,
    MessageError,
    ConnectError,
    VersionFallback,
}

impl H3Error {
    pub fn code(self) -> u64 {
        match self {
            H3Error::NoError => 0x0100,
            H3Error::GeneralProtocolError => 0x0101,
            H3Error::InternalError => 0x0102,
            H3Error::StreamCreationError => 0x0103,
            H3Error::ClosedCriticalStream => 0x0104,
            H3Error::FrameUnexpected => 0x0105,
            H3Error::FrameError => 0x0106,
            H3Error::ExcessiveLoad => 0x0107,
            H3Error::IdError => 0x0108,
            H3Error::SettingsError => 0x0109,
            H3Error::MissingSettings => 0x010a,
            H3Error::RequestRejected => 0x010b,
            H3Error::RequestCancelled => 0x010c,
            H3Error::RequestIncomplete => 0x010d,
            H3Error::MessageError => 0x010e,
            H3Error::ConnectError => 0x010f,
            H3Error::VersionFallback => 0x0110,
        }
    }
}

#[derive(Debug, Error)]
pub enum H3DecodeError {
    #[error("buffer exhausted while decoding an HTTP/3 frame")]
    Truncated,
    #[error("varint overflow (value exceeds 2^62-1)")]
    VarIntOverflow,
    #[error("SETTINGS value exceeded its valid range")]
    SettingsValueOutOfRange,
    #[error("stream's first byte did not identify a known unidirectional stream type")]
    UnknownStreamType,
    #[error("critical stream closed: {0}")]
    ClosedCriticalStream(&'static str),
    #[error("frame type {0:#x} not permitted on this stream")]
    FrameUnexpected(u64),
    #[error("SETTINGS frame did not appear first on the control stream")]
    MissingSettings,
    #[error("request is missing a mandatory pseudo-header: {0}")]
    MissingPseudoHeader(&'static str),
    #[error("regular header field appeared before a pseudo-header")]
    PseudoHeaderAfterRegular,
    #[error("pseudo-header {0} is not valid for this message")]
    UnexpectedPseudoHeader(String),
    #[error("qpack error: {0}")]
    Qpack(#[from] qd_qpack::QpackError),
}

pub type H3Result<T> = std::result::Result<T, H3DecodeError>;
