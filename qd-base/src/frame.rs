//! QUIC frame codec (RFC 9000 §19). Every frame type has a byte-for-byte
//! encode/decode pair against a `bytes::{Buf, BufMut}` cursor. Decoding is
//! single-pass with strict bound checking.

use crate::error::FrameDecodeError;
use crate::varint::VarInt;
use bytes::{Buf, BufMut, Bytes};

/// STREAM frame type bits, RFC 9000 §19.8: 0x08 | OFF(0x4) | LEN(0x2) | FIN(0x1).
const STREAM_TYPE_BASE: u64 = 0x08;
const STREAM_FIN_BIT: u64 = 0x01;
const STREAM_LEN_BIT: u64 = 0x02;
const STREAM_OFF_BIT: u64 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    /// Smallest packet number in this range.
    pub smallest: u64,
    /// Largest packet number in this range.
    pub largest: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Padding {
        len: usize,
    },
    Ping,
    Ack {
        largest_acked: u64,
        ack_delay: u64,
        ranges: Vec<AckRange>,
        ecn_counts: Option<(u64, u64, u64)>,
    },
    ResetStream {
        stream_id: u64,
        error_code: u64,
        final_size: u64,
    },
    StopSending {
        stream_id: u64,
        error_code: u64,
    },
    Crypto {
        offset: u64,
        data: Bytes,
    },
    NewToken {
        token: Bytes,
    },
    Stream {
        stream_id: u64,
        offset: u64,
        data: Bytes,
        fin: bool,
    },
    MaxData {
        max: u64,
    },
    MaxStreamData {
        stream_id: u64,
        max: u64,
    },
    MaxStreamsBidi {
        max: u64,
    },
    MaxStreamsUni {
        max: u64,
    },
    DataBlocked {
        max: u64,
    },
    StreamDataBlocked {
        stream_id: u64,
        max: u64,
    },
    StreamsBlockedBidi {
        max: u64,
    },
    StreamsBlockedUni {
        max: u64,
    },
    NewConnectionId {
        sequence: u64,
        retire_prior_to: u64,
        cid: Bytes,
        reset_token: [u8; 16],
    },
    RetireConnectionId {
        sequence: u64,
    },
    PathChallenge {
        data: [u8; 8],
    },
    PathResponse {
        data: [u8; 8],
    },
    ConnectionCloseTransport {
        error_code: u64,
        frame_type: u64,
        reason: Bytes,
    },
    ConnectionCloseApplication {
        error_code: u64,
        reason: Bytes,
    },
    HandshakeDone,
}

impl Frame {
    /// Whether a packet containing only this frame still counts as
    /// ack-eliciting and in-flight (RFC 9000 §13.2). PADDING and ACK alone
    /// do not elicit an ACK from the peer.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Padding { .. } | Frame::Ack { .. })
    }

    pub fn frame_type(&self) -> u64 {
        match self {
            Frame::Padding { .. } => 0x00,
            Frame::Ping => 0x01,
            Frame::Ack { ecn_counts: None, .. } => 0x02,
            Frame::Ack { ecn_counts: Some(_), .. } => 0x03,
            Frame::ResetStream { .. } => 0x04,
            Frame::StopSending { .. } => 0x05,
            Frame::Crypto { .. } => 0x06,
            Frame::NewToken { .. } => 0x07,
            Frame::Stream { offset, fin, data, .. } => {
                STREAM_TYPE_BASE
                    | if *fin { STREAM_FIN_BIT } else { 0 }
                    | if !data.is_empty() { STREAM_LEN_BIT } else { 0 }
                    | if *offset != 0 { STREAM_OFF_BIT } else { 0 }
            }
            Frame::MaxData { .. } => 0x10,
            Frame::MaxStreamData { .. } => 0x11,
            Frame::MaxStreamsBidi { .. } => 0x12,
            Frame::MaxStreamsUni { .. } => 0x13,
            Frame::DataBlocked { .. } => 0x14,
            Frame::StreamDataBlocked { .. } => 0x15,
            Frame::StreamsBlockedBidi { .. } => 0x16,
            Frame::StreamsBlockedUni { .. } => 0x17,
            Frame::NewConnectionId { .. } => 0x18,
            Frame::RetireConnectionId { .. } => 0x19,
            Frame::PathChallenge { .. } => 0x1a,
            Frame::PathResponse { .. } => 0x1b,
            Frame::ConnectionCloseTransport { .. } => 0x1c,
            Frame::ConnectionCloseApplication { .. } => 0x1d,
            Frame::HandshakeDone => 0x1e,
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        let vi = |v: u64| VarInt::from_u64(v).expect("frame field exceeds varint range");
        match self {
            Frame::Padding { len } => {
                for _ in 0..*len {
                    out.put_u8(0x00);
                }
            }
            Frame::Ping => vi(0x01).encode(out),
            Frame::Ack {
                largest_acked,
                ack_delay,
                ranges,
                ecn_counts,
            } => {
                vi(if ecn_counts.is_some() { 0x03 } else { 0x02 }).encode(out);
                vi(*largest_acked).encode(out);
                vi(*ack_delay).encode(out);
                vi((ranges.len() - 1) as u64).encode(out);
                // Ranges are emitted in descending order starting from the
                // largest acknowledged (RFC 9000 §19.3).
                let first = &ranges[0];
                vi(first.largest - first.smallest).encode(out);
                for w in ranges.windows(2) {
                    let (prev, cur) = (w[0], w[1]);
                    let gap = prev.smallest - cur.largest - 2;
                    vi(gap).encode(out);
                    vi(cur.largest - cur.smallest).encode(out);
                }
                if let Some((ect0, ect1, ce)) = ecn_counts {
                    vi(*ect0).encode(out);
                    vi(*ect1).encode(out);
                    vi(*ce).encode(out);
                }
            }
            Frame::ResetStream {
                stream_id,
                error_code,
                final_size,
            } => {
                vi(0x04).encode(out);
                vi(*stream_id).encode(out);
                vi(*error_code).encode(out);
                vi(*final_size).encode(out);
            }
            Frame::StopSending {
                stream_id,
                error_code,
            } => {
                vi(0x05).encode(out);
                vi(*stream_id).encode(out);
                vi(*error_code).encode(out);
            }
            Frame::Crypto { offset, data } => {
                vi(0x06).encode(out);
                vi(*offset).encode(out);
                vi(data.len() as u64).encode(out);
                out.put_slice(data);
            }
            Frame::NewToken { token } => {
                vi(0x07).encode(out);
                vi(token.len() as u64).encode(out);
                out.put_slice(token);
            }
            Frame::Stream {
                stream_id,
                offset,
                data,
                fin,
            } => {
                vi(self.frame_type()).encode(out);
                vi(*stream_id).encode(out);
                if *offset != 0 {
                    vi(*offset).encode(out);
                }
                if !data.is_empty() {
                    vi(data.len() as u64).encode(out);
                }
                out.put_slice(data);
            }
            Frame::MaxData { max } => {
                vi(0x10).encode(out);
                vi(*max).encode(out);
            }
            Frame::MaxStreamData { stream_id, max } => {
                vi(0x11).encode(out);
                vi(*stream_id).encode(out);
                vi(*max).encode(out);
            }
            Frame::MaxStreamsBidi { max } => {
                vi(0x12).encode(out);
                vi(*max).encode(out);
            }
            Frame::MaxStreamsUni { max } => {
                vi(0x13).encode(out);
                vi(*max).encode(out);
            }
            Frame::DataBlocked { max } => {
                vi(0x14).encode(out);
                vi(*max).encode(out);
            }
            Frame::StreamDataBlocked { stream_id, max } => {
                vi(0x15).encode(out);
                vi(*stream_id).encode(out);
                vi(*max).encode(out);
            }
            Frame::StreamsBlockedBidi { max } => {
                vi(0x16).encode(out);
                vi(*max).encode(out);
            }
            Frame::StreamsBlockedUni { max } => {
                vi(0x17).encode(out);
                vi(*max).encode(out);
            }
            Frame::NewConnectionId {
                sequence,
                retire_prior_to,
                cid,
                reset_token,
            } => {
                vi(0x18).encode(out);
                vi(*sequence).encode(out);
                vi(*retire_prior_to).encode(out);
                out.put_u8(cid.len() as u8);
                out.put_slice(cid);
                out.put_slice(reset_token);
            }
            Frame::RetireConnectionId { sequence } => {
                vi(0x19).encode(out);
                vi(*sequence).encode(out);
            }
            Frame::PathChallenge { data } => {
                vi(0x1a).encode(out);
                out.put_slice(data);
            }
            Frame::PathResponse { data } => {
                vi(0x1b).encode(out);
                out.put_slice(data);
            }
            Frame::ConnectionCloseTransport {
                error_code,
                frame_type,
                reason,
            } => {
                vi(0x1c).encode(out);
                vi(*error_code).encode(out);
                vi(*frame_type).encode(out);
                vi(reason.len() as u64).encode(out);
                out.put_slice(reason);
            }
            Frame::ConnectionCloseApplication { error_code, reason } => {
                vi(0x1d).encode(out);
                vi(*error_code).encode(out);
                vi(reason.len() as u64).encode(out);
                out.put_slice(reason);
            }
            Frame::HandshakeDone => vi(0x1e).encode(out),
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, FrameDecodeError> {
        let frame_type = VarInt::decode(buf)?.into_inner();
        match frame_type {
            0x00 => {
                let mut len = 1;
                while buf.first() == Some(&0x00) {
                    buf.advance(1);
                    len += 1;
                }
                Ok(Frame::Padding { len })
            }
            0x01 => Ok(Frame::Ping),
            0x02 | 0x03 => decode_ack(buf, frame_type == 0x03),
            0x04 => Ok(Frame::ResetStream {
                stream_id: take_varint(buf)?,
                error_code: take_varint(buf)?,
                final_size: take_varint(buf)?,
            }),
            0x05 => Ok(Frame::StopSending {
                stream_id: take_varint(buf)?,
                error_code: take_varint(buf)?,
            }),
            0x06 => {
                let offset = take_varint(buf)?;
                let len = take_varint(buf)? as usize;
                let data = take_bytes(buf, len)?;
                Ok(Frame::Crypto { offset, data })
            }
            0x07 => {
                let len = take_varint(buf)? as usize;
                let token = take_bytes(buf, len)?;
                if token.is_empty() {
                    return Err(FrameDecodeError::ReservedBitsSet);
                }
                Ok(Frame::NewToken { token })
            }
            t if (STREAM_TYPE_BASE..=STREAM_TYPE_BASE + 0x07).contains(&t) => {
                let stream_id = take_varint(buf)?;
                let offset = if t & STREAM_OFF_BIT != 0 {
                    take_varint(buf)?
                } else {
                    0
                };
                let data = if t & STREAM_LEN_BIT != 0 {
                    let len = take_varint(buf)? as usize;
                    take_bytes(buf, len)?
                } else {
                    let rest = buf.clone();
                    buf.advance(rest.len());
                    rest
                };
                let fin = t & STREAM_FIN_BIT != 0;
                Ok(Frame::Stream {
                    stream_id,
                    offset,
                    data,
                    fin,
                })
            }
            0x10 => Ok(Frame::MaxData { max: take_varint(buf)? }),
            0x11 => Ok(Frame::MaxStreamData {
                stream_id: take_varint(buf)?,
                max: take_varint(buf)?,
            }),
            0x12 => Ok(Frame::MaxStreamsBidi { max: take_varint(buf)? }),
            0x13 => Ok(Frame::MaxStreamsUni { max: take_varint(buf)? }),
            0x14 => Ok(Frame::DataBlocked { max: take_varint(buf)? }),
            0x15 => Ok(Frame::StreamDataBlocked {
                stream_id: take_varint(buf)?,
                max: take_varint(buf)?,
            }),
            0x16 => Ok(Frame::StreamsBlockedBidi { max: take_varint(buf)? }),
            0x17 => Ok(Frame::StreamsBlockedUni { max: take_varint(buf)? }),
            0x18 => {
                let sequence = take_varint(buf)?;
                let retire_prior_to = take_varint(buf)?;
                if buf.is_empty() {
                    return Err(FrameDecodeError::Truncated);
                }
                let cid_len = buf.get_u8() as usize;
                if cid_len == 0 || cid_len > 20 {
                    return Err(FrameDecodeError::ReservedBitsSet);
                }
                let cid = take_bytes(buf, cid_len)?;
                if buf.remaining() < 16 {
                    return Err(FrameDecodeError::Truncated);
                }
                let mut reset_token = [0u8; 16];
                buf.copy_to_slice(&mut reset_token);
                Ok(Frame::NewConnectionId {
                    sequence,
                    retire_prior_to,
                    cid,
                    reset_token,
                })
            }
            0x19 => Ok(Frame::RetireConnectionId {
                sequence: take_varint(buf)?,
            }),
            0x1a => {
                if buf.remaining() < 8 {
                    return Err(FrameDecodeError::Truncated);
                }
                let mut data = [0u8; 8];
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathChallenge { data })
            }
            0x1b => {
                if buf.remaining() < 8 {
                    return Err(FrameDecodeError::Truncated);
                }
                let mut data = [0u8; 8];
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathResponse { data })
            }
            0x1c => {
                let error_code = take_varint(buf)?;
                let ft = take_varint(buf)?;
                let len = take_varint(buf)? as usize;
                let reason = take_bytes(buf, len)?;
                Ok(Frame::ConnectionCloseTransport {
                    error_code,
                    frame_type: ft,
                    reason,
                })
            }
            0x1d => {
                let error_code = take_varint(buf)?;
                let len = take_varint(buf)? as usize;
                let reason = take_bytes(buf, len)?;
                Ok(Frame::ConnectionCloseApplication { error_code, reason })
            }
            0x1e => Ok(Frame::HandshakeDone),
            // GREASE / extension frame types; recoverable at frame level.
            other => Err(FrameDecodeError::UnknownFrameType(other)),
        }
    }
}

fn take_varint(buf: &mut Bytes) -> Result<u64, FrameDecodeError> {
    Ok(VarInt::decode(buf)?.into_inner())
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, FrameDecodeError> {
    if buf.remaining() < len {
        return Err(FrameDecodeError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn decode_ack(buf: &mut Bytes, with_ecn: bool) -> Result<Frame, FrameDecodeError> {
    let largest_acked = take_varint(buf)?;
    let ack_delay = take_varint(buf)?;
    let range_count = take_varint(buf)?;
    let first_range = take_varint(buf)?;
    let mut ranges = Vec::with_capacity(range_count as usize + 1);
    let smallest = largest_acked
        .checked_sub(first_range)
        .ok_or(FrameDecodeError::AckRangeUnderflow)?;
    ranges.push(AckRange {
        smallest,
        largest: largest_acked,
    });
    let mut next_largest_bound = smallest;
    for _ in 0..range_count {
        let gap = take_varint(buf)?;
        let len = take_varint(buf)?;
        let largest = next_largest_bound
            .checked_sub(gap)
            .and_then(|v| v.checked_sub(2))
            .ok_or(FrameDecodeError::AckRangeUnderflow)?;
        let smallest = largest
            .checked_sub(len)
            .ok_or(FrameDecodeError::AckRangeUnderflow)?;
        ranges.push(AckRange { smallest, largest });
        next_largest_bound = smallest;
    }
    let ecn_counts = if with_ecn {
        let ect0 = take_varint(buf)?;
        let ect1 = take_varint(buf)?;
        let ce = take_varint(buf)?;
        Some((ect0, ect1, ce))
    } else {
        None
    };
    Ok(Frame::Ack {
        largest_acked,
        ack_delay,
        ranges,
        ecn_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(frame: Frame) {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut cursor = buf.freeze();
        let decoded = Frame::decode(&mut cursor).expect("decode");
        assert_eq!(decoded, frame);
        assert!(cursor.is_empty(), "decode left unconsumed bytes");
    }

    #[test]
    fn ping_and_padding_roundtrip() {
        roundtrip(Frame::Ping);
        roundtrip(Frame::HandshakeDone);
    }

    #[test]
    fn stream_frame_roundtrip_with_and_without_offset() {
        roundtrip(Frame::Stream {
            stream_id: 4,
            offset: 0,
            data: Bytes::from_static(b"hello"),
            fin: true,
        });
        roundtrip(Frame::Stream {
            stream_id: 8,
            offset: 100,
            data: Bytes::from_static(b"world"),
            fin: false,
        });
    }

    #[test]
    fn ack_frame_with_multiple_ranges_roundtrips() {
        roundtrip(Frame::Ack {
            largest_acked: 100,
            ack_delay: 10,
            ranges: vec![
                AckRange {
                    smallest: 95,
                    largest: 100,
                },
                AckRange {
                    smallest: 80,
                    largest: 90,
                },
            ],
            ecn_counts: None,
        });
        roundtrip(Frame::Ack {
            largest_acked: 5,
            ack_delay: 0,
            ranges: vec![AckRange {
                smallest: 0,
                largest: 5,
            }],
            ecn_counts: Some((1, 2, 3)),
        });
    }

    #[test]
    fn connection_close_roundtrips() {
        roundtrip(Frame::ConnectionCloseTransport {
            error_code: 0x0a,
            frame_type: 0,
            reason: Bytes::from_static(b"protocol violation"),
        });
        roundtrip(Frame::ConnectionCloseApplication {
            error_code: 1,
            reason: Bytes::new(),
        });
    }

    #[test]
    fn new_connection_id_roundtrips() {
        roundtrip(Frame::NewConnectionId {
            sequence: 1,
            retire_prior_to: 0,
            cid: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
            reset_token: [9u8; 16],
        });
    }

    #[test]
    fn unknown_frame_type_is_recoverable() {
        let mut buf = BytesMut::new();
        VarInt::from_u64(0x40).unwrap().encode(&mut buf);
        let mut cursor = buf.freeze();
        assert!(matches!(
            Frame::decode(&mut cursor),
            Err(FrameDecodeError::UnknownFrameType(0x40))
        ));
    }

    #[test]
    fn is_ack_eliciting_excludes_padding_and_ack() {
        assert!(!Frame::Padding { len: 1 }.is_ack_eliciting());
        assert!(!Frame::Ack {
            largest_acked: 0,
            ack_delay: 0,
            ranges: vec![AckRange { smallest: 0, largest: 0 }],
            ecn_counts: None
        }
        .is_ack_eliciting());
        assert!(Frame::Ping.is_ack_eliciting());
    }
}
