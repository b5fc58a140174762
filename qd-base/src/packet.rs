//! Long/short header packet layout, packet-number encoding, and the
//! `PacketProtection` seam for AEAD seal/open + header protection
//! (RFC 9000 §17). Header fields are read and written with direct bit
//! shifts/masks on a flags byte.

use crate::cid::ConnectionId;
use crate::error::PacketDecodeError;
use crate::varint::VarInt;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const QUIC_VERSION_1: u32 = 0x0000_0001;
/// Minimum size of a UDP datagram carrying a client Initial packet.
pub const CLIENT_INITIAL_MIN_LEN: usize = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongPacketType {
    fn bits(self) -> u8 {
        match self {
            LongPacketType::Initial => 0b00,
            LongPacketType::ZeroRtt => 0b01,
            LongPacketType::Handshake => 0b10,
            LongPacketType::Retry => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => LongPacketType::Initial,
            0b01 => LongPacketType::ZeroRtt,
            0b10 => LongPacketType::Handshake,
            _ => LongPacketType::Retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongHeader {
    pub packet_type: LongPacketType,
    pub version: u32,
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    /// Initial packets only; empty otherwise.
    pub token: Bytes,
    /// Reconstructed packet number, `None` until header-protection removal
    /// fills it in (decode proceeds in two passes: parse the unprotected
    /// fields, then unmask).
    pub packet_number: Option<u64>,
    pub packet_number_len: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortHeader {
    pub dst_cid: ConnectionId,
    pub spin_bit: bool,
    pub key_phase: bool,
    pub packet_number: Option<u64>,
    pub packet_number_len: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Long(LongHeader),
    Short(ShortHeader),
    VersionNegotiation { dst_cid: ConnectionId, src_cid: ConnectionId },
}

/// Encodes the first byte of a long header. Low 4 bits (type-specific) carry
/// the packet number length in the top 2 bits once protection is applied;
/// before protection those bits (and the reserved bits) are transmitted as
/// zero per RFC 9000 §17.2, with the true packet-number length and reserved
/// bits masked in afterward by header protection.
fn long_first_byte(packet_type: LongPacketType) -> u8 {
    0b1100_0000 | (packet_type.bits() << 4)
}

impl Header {
    pub fn dst_cid(&self) -> &ConnectionId {
        match self {
            Header::Long(h) => &h.dst_cid,
            Header::Short(h) => &h.dst_cid,
            Header::VersionNegotiation { dst_cid, .. } => dst_cid,
        }
    }

    /// Encodes everything up to (but not including) the packet-number
    /// bytes and payload; caller appends PN + protected payload afterward so
    /// that header protection can be applied to the already-serialized PN.
    pub fn encode_prefix(&self, out: &mut impl BufMut, remainder_len: usize) {
        match self {
            Header::Long(h) => {
                let mut first = long_first_byte(h.packet_type);
                first |= (h.packet_number_len - 1) & 0b11;
                out.put_u8(first);
                out.put_u32(h.version);
                out.put_u8(h.dst_cid.len() as u8);
                out.put_slice(h.dst_cid.as_bytes());
                out.put_u8(h.src_cid.len() as u8);
                out.put_slice(h.src_cid.as_bytes());
                if h.packet_type == LongPacketType::Initial {
                    VarInt::from_u64(h.token.len() as u64)
                        .expect("token too long")
                        .encode(out);
                    out.put_slice(&h.token);
                }
                let len = remainder_len + h.packet_number_len as usize;
                VarInt::from_u64(len as u64)
                    .expect("packet length exceeds varint range")
                    .encode(out);
            }
            Header::Short(h) => {
                let mut first = 0b0100_0000u8;
                if h.spin_bit {
                    first |= 0b0010_0000;
                }
                if h.key_phase {
                    first |= 0b0000_0100;
                }
                first |= (h.packet_number_len - 1) & 0b11;
                out.put_u8(first);
                out.put_slice(h.dst_cid.as_bytes());
            }
            Header::VersionNegotiation { dst_cid, src_cid } => {
                out.put_u8(0b1000_0000);
                out.put_u32(0); // version 0 signals version negotiation
                out.put_u8(dst_cid.len() as u8);
                out.put_slice(dst_cid.as_bytes());
                out.put_u8(src_cid.len() as u8);
                out.put_slice(src_cid.as_bytes());
            }
        }
    }

    pub fn encode_packet_number(len: u8, pn: u64, out: &mut impl BufMut) {
        for i in (0..len).rev() {
            out.put_u8(((pn >> (8 * i)) & 0xFF) as u8);
        }
    }

    /// Parses the long/short header discriminant and, for long headers,
    /// everything through the Length field. The packet-number field itself
    /// is still header-protected at this point; the caller (the connection,
    /// which owns keys) removes protection and calls
    /// [`finish_decode_packet_number`].
    pub fn decode(buf: &mut Bytes, local_cid_len: usize) -> Result<Self, PacketDecodeError> {
        if buf.is_empty() {
            return Err(PacketDecodeError::Truncated);
        }
        let first = buf[0];
        if first & 0x80 != 0 {
            Self::decode_long(buf)
        } else {
            Self::decode_short(buf, local_cid_len)
        }
    }

    fn decode_long(buf: &mut Bytes) -> Result<Self, PacketDecodeError> {
        let first = buf.get_u8();
        if buf.remaining() < 4 {
            return Err(PacketDecodeError::Truncated);
        }
        let version = buf.get_u32();
        let dst_cid = read_cid(buf)?;
        let src_cid = read_cid(buf)?;
        if version == 0 {
            return Ok(Header::VersionNegotiation { dst_cid, src_cid });
        }
        if version != QUIC_VERSION_1 {
            return Err(PacketDecodeError::UnsupportedVersion(version));
        }
        let packet_type = LongPacketType::from_bits(first >> 4);
        let token = if packet_type == LongPacketType::Initial {
            let len = VarInt::decode_for_packet(buf)?.as_usize();
            if buf.remaining() < len {
                return Err(PacketDecodeError::Truncated);
            }
            buf.copy_to_bytes(len)
        } else {
            Bytes::new()
        };
        let _length = VarInt::decode_for_packet(buf)?.as_usize();
        // packet_number_len is only known after header protection removal;
        // callers fill it and packet_number in via finish_decode_packet_number.
        Ok(Header::Long(LongHeader {
            packet_type,
            version,
            dst_cid,
            src_cid,
            token,
            packet_number: None,
            packet_number_len: 0,
        }))
    }

    fn decode_short(buf: &mut Bytes, local_cid_len: usize) -> Result<Self, PacketDecodeError> {
        let first = buf.get_u8();
        if buf.remaining() < local_cid_len {
            return Err(PacketDecodeError::Truncated);
        }
        let dst_cid = ConnectionId::new(buf.copy_to_bytes(local_cid_len).to_vec());
        Ok(Header::Short(ShortHeader {
            dst_cid,
            spin_bit: first & 0b0010_0000 != 0,
            key_phase: first & 0b0000_0100 != 0,
            packet_number: None,
            packet_number_len: 0,
        }))
    }
}

fn read_cid(buf: &mut Bytes) -> Result<ConnectionId, PacketDecodeError> {
    if buf.is_empty() {
        return Err(PacketDecodeError::Truncated);
    }
    let len = buf.get_u8();
    if len as usize > crate::cid::MAX_CID_LEN {
        return Err(PacketDecodeError::ConnectionIdTooLong(len));
    }
    if buf.remaining() < len as usize {
        return Err(PacketDecodeError::Truncated);
    }
    Ok(ConnectionId::new(buf.copy_to_bytes(len as usize).to_vec()))
}

/// RFC 9000 §A.3 truncated packet number expansion: reconstructs the full
/// packet number nearest `expected_pn = largest_pn_in_space + 1` that is
/// consistent with the transmitted low-order bits.
pub fn decode_packet_number(truncated: u64, pn_len: u8, largest_pn: Option<u64>) -> u64 {
    let expected = largest_pn.map(|l| l + 1).unwrap_or(0);
    let pn_bits = 8 * pn_len as u32;
    let pn_win = 1u64 << pn_bits;
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;
    let candidate = (expected & !pn_mask) | truncated;
    if candidate + pn_hwin <= expected && candidate < (1u64 << 62) - pn_win {
        candidate + pn_win
    } else if candidate > expected + pn_hwin && candidate >= pn_win {
        candidate - pn_win
    } else {
        candidate
    }
}

/// Minimal encoding length of a packet number given how far it is from the
/// largest acknowledged packet number in its space, per RFC 9000 §17.1.
pub fn packet_number_len(pn: u64, largest_acked: Option<u64>) -> u8 {
    let num_unacked = match largest_acked {
        Some(acked) => pn.saturating_sub(acked),
        None => pn + 1,
    };
    if num_unacked < (1 << 7) {
        1
    } else if num_unacked < (1 << 15) {
        2
    } else if num_unacked < (1 << 23) {
        3
    } else {
        4
    }
}

/// Pads a serialized client Initial datagram up to the 1200 byte minimum
/// (RFC 9000 §14.1) with PADDING frame bytes (0x00) appended to the payload
/// before sealing; called on the assembled plaintext payload.
pub fn pad_initial_payload(payload: &mut BytesMut, header_and_pn_len: usize, min_len: usize) {
    let current_total = header_and_pn_len + payload.len();
    if current_total < min_len {
        payload.resize(payload.len() + (min_len - current_total), 0);
    }
}

/// The seam between packet codec and TLS: sealing/opening and header
/// protection both need per-encryption-level keys that `qd-base` does not
/// own. Implemented by `qd-conn::tls::CryptoLevel`.
pub trait PacketProtection {
    fn seal(&self, packet_number: u64, header: &[u8], payload: &mut BytesMut) -> Result<(), ()>;
    fn open(&self, packet_number: u64, header: &[u8], payload: &mut BytesMut) -> Result<(), ()>;
    /// Returns the 5-byte header-protection mask derived from `sample`.
    fn header_protection_mask(&self, sample: &[u8]) -> [u8; 5];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_header_roundtrips_through_prefix_encode_decode() {
        let header = Header::Long(LongHeader {
            packet_type: LongPacketType::Initial,
            version: QUIC_VERSION_1,
            dst_cid: ConnectionId::new(vec![1; 8]),
            src_cid: ConnectionId::new(vec![2; 8]),
            token: Bytes::new(),
            packet_number: Some(0),
            packet_number_len: 2,
        });
        let mut buf = BytesMut::new();
        header.encode_prefix(&mut buf, 100);
        let mut frozen = buf.freeze();
        let decoded = Header::decode(&mut frozen, 8).unwrap();
        match decoded {
            Header::Long(h) => {
                assert_eq!(h.packet_type, LongPacketType::Initial);
                assert_eq!(h.dst_cid.as_bytes(), &[1; 8]);
                assert_eq!(h.src_cid.as_bytes(), &[2; 8]);
            }
            _ => panic!("expected long header"),
        }
    }

    #[test]
    fn version_negotiation_is_recognized() {
        let header = Header::VersionNegotiation {
            dst_cid: ConnectionId::new(vec![1, 2]),
            src_cid: ConnectionId::new(vec![3, 4]),
        };
        let mut buf = BytesMut::new();
        header.encode_prefix(&mut buf, 0);
        let mut frozen = buf.freeze();
        assert!(matches!(
            Header::decode(&mut frozen, 8).unwrap(),
            Header::VersionNegotiation { .. }
        ));
    }

    #[test]
    fn short_header_roundtrips() {
        let header = Header::Short(ShortHeader {
            dst_cid: ConnectionId::new(vec![9; 8]),
            spin_bit: true,
            key_phase: false,
            packet_number: Some(5),
            packet_number_len: 1,
        });
        let mut buf = BytesMut::new();
        header.encode_prefix(&mut buf, 10);
        let mut frozen = buf.freeze();
        match Header::decode(&mut frozen, 8).unwrap() {
            Header::Short(h) => {
                assert!(h.spin_bit);
                assert!(!h.key_phase);
                assert_eq!(h.dst_cid.as_bytes(), &[9; 8]);
            }
            _ => panic!("expected short header"),
        }
    }

    #[test]
    fn packet_number_reconstruction_matches_rfc_example() {
        // RFC 9000 §A.3 worked example: largest acked 0xa82f30ea, truncated
        // 0x9b32 (2 bytes) decodes back to 0xa82f9b32.
        let decoded = decode_packet_number(0x9b32, 2, Some(0xa82f30ea));
        assert_eq!(decoded, 0xa82f9b32);
    }

    #[test]
    fn packet_number_len_grows_with_distance_from_largest_acked() {
        assert_eq!(packet_number_len(1, Some(0)), 1);
        assert_eq!(packet_number_len(1000, Some(0)), 2);
    }

    #[test]
    fn initial_padding_reaches_minimum_length() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&[1, 2, 3]);
        pad_initial_payload(&mut payload, 20, CLIENT_INITIAL_MIN_LEN);
        assert_eq!(payload.len() + 20, CLIENT_INITIAL_MIN_LEN);
    }

    #[test]
    fn rejects_oversized_connection_id() {
        let mut buf = BytesMut::new();
        buf.put_u8(0b1100_0000);
        buf.put_u32(QUIC_VERSION_1);
        buf.put_u8(21); // > MAX_CID_LEN
        let mut frozen = buf.freeze();
        assert!(matches!(
            Header::decode(&mut frozen, 8),
            Err(PacketDecodeError::ConnectionIdTooLong(21))
        ));
    }
}
