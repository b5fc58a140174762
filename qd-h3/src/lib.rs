//! HTTP/3 (RFC 9114) over the QPACK-compressed, QUIC-transported frame and
//! stream model: a frame codec, the three mandatory unidirectional streams,
//! and request/response assembly wired to `qd-qpack`'s header
//! (de)compression.

pub mod control;
pub mod error;
pub mod frame;
pub mod request;

pub use error::{H3DecodeError, H3Error, H3Result};
pub use frame::Frame;
