//! HTTP/3 frame codec (RFC 9114 §7.2). Every frame is `type (varint) |
//! length (varint) | payload[length]`; HEADERS and PUSH_PROMISE payloads
//! carry an opaque QPACK-encoded field section that this layer does not
//! interpret — that is `qd-qpack`'s job, wired in from `request.rs`.

use crate::error::{H3DecodeError, H3Result};
use bytes::{Buf, BufMut, Bytes};
use qd_base::varint::VarInt;

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_CANCEL_PUSH: u64 = 0x03;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_PUSH_PROMISE: u64 = 0x05;
pub const FRAME_GOAWAY: u64 = 0x07;
pub const FRAME_MAX_PUSH_ID: u64 = 0x0d;

/// `0x1f * N + 0x21` for `N >= 0`: reserved codepoints for GREASE, RFC 9114
/// §7.2.8. A peer MAY send frames of these types; receivers MUST ignore
/// them rather than treat them as a protocol error.
pub fn is_grease_frame_type(frame_type: u64) -> bool {
    frame_type >= 0x21 && (frame_type - 0x21) % 0x1f == 0
}

pub fn is_grease_stream_type(stream_type: u64) -> bool {
    is_grease_frame_type(stream_type)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsParam {
    pub id: u64,
    pub value: u64,
}

/// RFC 9114 §7.2.4.1 / RFC 9204 §5.
pub const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
pub const SETTINGS_MAX_FIELD_SECTION_SIZE: u64 = 0x06;
pub const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data {
        data: Bytes,
    },
    Headers {
        block: Bytes,
    },
    CancelPush {
        push_id: u64,
    },
    Settings {
        params: Vec<SettingsParam>,
    },
    PushPromise {
        push_id: u64,
        block: Bytes,
    },
    Goaway {
        id: u64,
    },
    MaxPushId {
        push_id: u64,
    },
    /// Any frame type not in the table above: GREASE codepoints and
    /// genuinely unknown extension types are both carried here, since both
    /// are handled the same way — ignore the payload and move on.
    Unknown {
        frame_type: u64,
        payload: Bytes,
    },
}

impl Frame {
    pub fn frame_type(&self) -> u64 {
        match self {
            Frame::Data { .. } => FRAME_DATA,
            Frame::Headers { .. } => FRAME_HEADERS,
            Frame::CancelPush { .. } => FRAME_CANCEL_PUSH,
            Frame::Settings { .. } => FRAME_SETTINGS,
            Frame::PushPromise { .. } => FRAME_PUSH_PROMISE,
            Frame::Goaway { .. } => FRAME_GOAWAY,
            Frame::MaxPushId { .. } => FRAME_MAX_PUSH_ID,
            Frame::Unknown { frame_type, .. } => *frame_type,
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        let vi = |v: u64| VarInt::from_u64(v).expect("h3 frame field exceeds varint range");
        vi(self.frame_type()).encode(out);
        match self {
            Frame::Data { data } => {
                vi(data.len() as u64).encode(out);
                out.put_slice(data);
            }
            Frame::Headers { block } => {
                vi(block.len() as u64).encode(out);
                out.put_slice(block);
            }
            Frame::CancelPush { push_id } => {
                vi(VarInt::from_u64(*push_id).unwrap().encoded_len() as u64).encode(out);
                vi(*push_id).encode(out);
            }
            Frame::Settings { params } => {
                let mut body = bytes::BytesMut::new();
                for p in params {
                    vi(p.id).encode(&mut body);
                    vi(p.value).encode(&mut body);
                }
                vi(body.len() as u64).encode(out);
                out.put_slice(&body);
            }
            Frame::PushPromise { push_id, block } => {
                let id_len = VarInt::from_u64(*push_id).unwrap().encoded_len();
                vi((id_len + block.len()) as u64).encode(out);
                vi(*push_id).encode(out);
                out.put_slice(block);
            }
            Frame::Goaway { id } => {
                vi(VarInt::from_u64(*id).unwrap().encoded_len() as u64).encode(out);
                vi(*id).encode(out);
            }
            Frame::MaxPushId { push_id } => {
                vi(VarInt::from_u64(*push_id).unwrap().encoded_len() as u64).encode(out);
                vi(*push_id).encode(out);
            }
            Frame::Unknown { payload, .. } => {
                vi(payload.len() as u64).encode(out);
                out.put_slice(payload);
            }
        }
    }

    /// Decodes exactly one frame from the front of `buf`, consuming it.
    /// Returns `Ok(None)` if `buf` doesn't yet hold a complete frame (the
    /// caller buffers more bytes and retries).
    pub fn decode(buf: &mut Bytes) -> H3Result<Option<Frame>> {
        let mut probe = buf.clone();
        let frame_type = match VarInt::decode(&mut probe) {
            Ok(v) => v.into_inner(),
            Err(_) => return Ok(None),
        };
        let length = match VarInt::decode(&mut probe) {
            Ok(v) => v.into_inner() as usize,
            Err(_) => return Ok(None),
        };
        if probe.remaining() < length {
            return Ok(None);
        }
        let mut payload = probe.copy_to_bytes(length);
        *buf = probe;

        let frame = match frame_type {
            FRAME_DATA => Frame::Data { data: payload },
            FRAME_HEADERS => Frame::Headers { block: payload },
            FRAME_CANCEL_PUSH => Frame::CancelPush {
                push_id: read_single_varint(&mut payload)?,
            },
            FRAME_SETTINGS => Frame::Settings {
                params: decode_settings(&mut payload)?,
            },
            FRAME_PUSH_PROMISE => {
                let push_id = read_single_varint(&mut payload)?;
                Frame::PushPromise {
                    push_id,
                    block: payload,
                }
            }
            FRAME_GOAWAY => Frame::Goaway {
                id: read_single_varint(&mut payload)?,
            },
            FRAME_MAX_PUSH_ID => Frame::MaxPushId {
                push_id: read_single_varint(&mut payload)?,
            },
            other => Frame::Unknown {
                frame_type: other,
                payload,
            },
        };
        Ok(Some(frame))
    }
}

/// Reads one varint off the front of `payload`, leaving the remainder —
/// used both for single-field frames (CANCEL_PUSH, GOAWAY, MAX_PUSH_ID) and
/// for PUSH_PROMISE, where the rest of the payload is the header block.
fn read_single_varint(payload: &mut Bytes) -> H3Result<u64> {
    VarInt::decode(payload)
        .map(VarInt::into_inner)
        .map_err(|_| H3DecodeError::Truncated)
}

fn decode_settings(payload: &mut Bytes) -> H3Result<Vec<SettingsParam>> {
    let mut params = Vec::new();
    while payload.has_remaining() {
        let id = VarInt::decode(payload).map_err(|_| H3DecodeError::Truncated)?.into_inner();
        let value = VarInt::decode(payload).map_err(|_| H3DecodeError::Truncated)?.into_inner();
        params.push(SettingsParam { id, value });
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut buf = bytes::BytesMut::new();
        frame.encode(&mut buf);
        let mut bytes = buf.freeze();
        Frame::decode(&mut bytes).unwrap().unwrap()
    }

    #[test]
    fn data_frame_round_trips() {
        let frame = Frame::Data {
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn settings_frame_round_trips_multiple_params() {
        let frame = Frame::Settings {
            params: vec![
                SettingsParam {
                    id: SETTINGS_QPACK_MAX_TABLE_CAPACITY,
                    value: 4096,
                },
                SettingsParam {
                    id: SETTINGS_MAX_FIELD_SECTION_SIZE,
                    value: 16384,
                },
                SettingsParam {
                    id: SETTINGS_QPACK_BLOCKED_STREAMS,
                    value: 16,
                },
            ],
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn goaway_and_max_push_id_round_trip() {
        assert_eq!(round_trip(Frame::Goaway { id: 400 }), Frame::Goaway { id: 400 });
        assert_eq!(
            round_trip(Frame::MaxPushId { push_id: 7 }),
            Frame::MaxPushId { push_id: 7 }
        );
    }

    #[test]
    fn push_promise_round_trips_id_and_block() {
        let frame = Frame::PushPromise {
            push_id: 3,
            block: Bytes::from_static(b"field-section"),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn unrecognized_frame_type_decodes_as_unknown_and_is_skippable() {
        let mut buf = bytes::BytesMut::new();
        VarInt::from_u64(0x40).unwrap().encode(&mut buf); // not in the known table, not GREASE either
        VarInt::from_u64(3).unwrap().encode(&mut buf);
        buf.put_slice(b"abc");
        let mut bytes = buf.freeze();
        let frame = Frame::decode(&mut bytes).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Unknown {
                frame_type: 0x40,
                payload: Bytes::from_static(b"abc"),
            }
        );
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn grease_frame_types_are_identified() {
        assert!(is_grease_frame_type(0x21));
        assert!(is_grease_frame_type(0x21 + 0x1f * 3));
        assert!(!is_grease_frame_type(FRAME_HEADERS));
        assert!(!is_grease_frame_type(0x22));
    }

    #[test]
    fn incomplete_frame_returns_none_instead_of_erroring() {
        let mut buf = bytes::BytesMut::new();
        VarInt::from_u64(FRAME_DATA).unwrap().encode(&mut buf);
        VarInt::from_u64(10).unwrap().encode(&mut buf);
        buf.put_slice(b"short"); // only 5 of the promised 10 bytes
        let mut bytes = buf.freeze();
        assert!(Frame::decode(&mut bytes).unwrap().is_none());
    }
}
