//! Wire primitives shared by every layer of the `qd` QUIC + HTTP/3 endpoint:
//! variable-length integers, the zero-copy buffer chain, frame and packet
//! codecs, connection IDs, transport parameters, and the crate-wide
//! transport error vocabulary.

pub mod buffer;
pub mod cid;
pub mod error;
pub mod frame;
pub mod packet;
pub mod space;
pub mod tparams;
pub mod varint;

pub use error::{QuicError, Result, TransportError};
pub use varint::VarInt;
