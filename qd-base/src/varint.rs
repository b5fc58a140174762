//! QUIC variable-length integer codec (RFC 9000 §16), 2-bit length prefix,
//! 1/2/4/8-byte encodings, decoded with `bytes::{Buf, BufMut}` cursors so
//! decoding a chain of varints is O(n) instead of O(n^2).

use crate::error::{FrameDecodeError, PacketDecodeError};
use bytes::{Buf, BufMut};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self((1 << 62) - 1);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Self(value))
    }

    /// Callers must have already established `value <= VarInt::MAX`.
    pub const fn from_u64_unchecked(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0.try_into().expect("varint exceeds platform usize")
    }

    /// Number of bytes the length-prefixed encoding occupies: 1, 2, 4, or 8.
    pub fn encoded_len(self) -> usize {
        match self.0 {
            v if v < (1 << 6) => 1,
            v if v < (1 << 14) => 2,
            v if v < (1 << 30) => 4,
            _ => 8,
        }
    }

    pub fn encode(self, out: &mut impl BufMut) {
        let len = self.encoded_len();
        let prefix: u8 = match len {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            8 => 0b11,
            _ => unreachable!(),
        };
        let first = (prefix << 6) | ((self.0 >> (8 * (len - 1))) & 0x3F) as u8;
        out.put_u8(first);
        for i in (0..len - 1).rev() {
            out.put_u8(((self.0 >> (8 * i)) & 0xFF) as u8);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, FrameDecodeError> {
        if !buf.has_remaining() {
            return Err(FrameDecodeError::Truncated);
        }
        let first = buf.get_u8();
        let disc = first >> 6;
        let tail_len = (1usize << disc) - 1;
        if buf.remaining() < tail_len {
            return Err(FrameDecodeError::Truncated);
        }
        let mut val = (first & 0x3F) as u64;
        for _ in 0..tail_len {
            val = (val << 8) | buf.get_u8() as u64;
        }
        Ok(Self(val))
    }

    pub fn decode_for_packet(buf: &mut impl Buf) -> Result<Self, PacketDecodeError> {
        Self::decode(buf).map_err(PacketDecodeError::Frame)
    }
}

impl Default for VarInt {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<u8> for VarInt {
    fn from(v: u8) -> Self {
        Self(v as u64)
    }
}

impl From<u16> for VarInt {
    fn from(v: u16) -> Self {
        Self(v as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = FrameDecodeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_u64(value).ok_or(FrameDecodeError::VarIntOverflow)
    }
}

impl From<VarInt> for u64 {
    fn from(v: VarInt) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(v: u64, expect_len: usize) {
        let vi = VarInt::from_u64(v).unwrap();
        assert_eq!(vi.encoded_len(), expect_len);
        let mut buf = BytesMut::new();
        vi.encode(&mut buf);
        assert_eq!(buf.len(), expect_len);
        let mut cursor = buf.freeze();
        let decoded = VarInt::decode(&mut cursor).unwrap();
        assert_eq!(decoded, vi);
    }

    #[test]
    fn boundary_sizes() {
        // B1: exactly 1, 1, 2, 2, 4, 4, 8, 8 bytes.
        roundtrip(0, 1);
        roundtrip(63, 1);
        roundtrip(64, 2);
        roundtrip(16383, 2);
        roundtrip(16384, 4);
        roundtrip((1u64 << 30) - 1, 4);
        roundtrip(1u64 << 30, 8);
        roundtrip((1u64 << 62) - 1, 8);
    }

    #[test]
    fn literal_vectors() {
        let mut buf = BytesMut::new();
        VarInt::from_u32(63).encode(&mut buf);
        assert_eq!(&buf[..], &[0x3F]);

        let mut buf = BytesMut::new();
        VarInt::from_u32(64).encode(&mut buf);
        assert_eq!(&buf[..], &[0x40, 0x40]);

        let mut buf = BytesMut::new();
        VarInt::from_u32(16383).encode(&mut buf);
        assert_eq!(&buf[..], &[0x7F, 0xFF]);

        let mut buf = BytesMut::new();
        VarInt::from_u32(16384).encode(&mut buf);
        assert_eq!(&buf[..], &[0x80, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn rejects_values_above_max() {
        assert!(VarInt::from_u64(1u64 << 62).is_none());
        assert!(VarInt::try_from(u64::MAX).is_err());
    }

    #[test]
    fn truncated_input_errors() {
        let mut buf = &[0x80u8][..];
        assert!(matches!(
            VarInt::decode(&mut buf),
            Err(FrameDecodeError::Truncated)
        ));
    }
}
