//! Mandatory unidirectional streams: a control stream and the two QPACK
//! instruction streams, one pair per direction. The first byte of a
//! unidirectional stream names its role (RFC 9114 §6.2); the control
//! stream's first frame MUST be SETTINGS.

use crate::error::{H3DecodeError, H3Result};
use crate::frame::{self, Frame, SettingsParam};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use qd_base::varint::VarInt;

pub const STREAM_CONTROL: u64 = 0x00;
pub const STREAM_PUSH: u64 = 0x01;
pub const STREAM_QPACK_ENCODER: u64 = 0x02;
pub const STREAM_QPACK_DECODER: u64 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Control,
    Push(u64),
    QpackEncoder,
    QpackDecoder,
    /// GREASE or a genuinely unknown stream type; RFC 9114 §6.2.3 says to
    /// read and discard data on these rather than treat them as an error.
    Unknown(u64),
}

/// Peeks the stream-type varint off the front of a freshly opened
/// unidirectional stream. Returns `Ok(None)` if not enough bytes have
/// arrived yet.
pub fn identify_stream(buf: &mut Bytes) -> H3Result<Option<StreamRole>> {
    let mut probe = buf.clone();
    let stream_type = match VarInt::decode(&mut probe) {
        Ok(v) => v.into_inner(),
        Err(_) => return Ok(None),
    };
    *buf = probe;
    Ok(Some(match stream_type {
        STREAM_CONTROL => StreamRole::Control,
        STREAM_PUSH => StreamRole::Push(stream_type),
        STREAM_QPACK_ENCODER => StreamRole::QpackEncoder,
        STREAM_QPACK_DECODER => StreamRole::QpackDecoder,
        other => StreamRole::Unknown(other),
    }))
}

pub fn push_stream_header(push_id: u64, out: &mut impl BufMut) {
    VarInt::from_u64(STREAM_PUSH).unwrap().encode(out);
    VarInt::from_u64(push_id).expect("push id exceeds varint range").encode(out);
}

/// Builds the bytes a sender writes at the start of its control stream:
/// the stream-type prefix followed by the mandatory first SETTINGS frame.
pub fn build_control_stream_prefix(settings: &[SettingsParam]) -> Vec<u8> {
    let mut out = BytesMut::new();
    VarInt::from_u64(STREAM_CONTROL).unwrap().encode(&mut out);
    Frame::Settings {
        params: settings.to_vec(),
    }
    .encode(&mut out);
    out.to_vec()
}

pub fn build_qpack_encoder_stream_prefix() -> Vec<u8> {
    let mut out = BytesMut::new();
    VarInt::from_u64(STREAM_QPACK_ENCODER).unwrap().encode(&mut out);
    out.to_vec()
}

pub fn build_qpack_decoder_stream_prefix() -> Vec<u8> {
    let mut out = BytesMut::new();
    VarInt::from_u64(STREAM_QPACK_DECODER).unwrap().encode(&mut out);
    out.to_vec()
}

/// Frame-level reader for an inbound control stream. Buffers bytes across
/// calls until a complete frame is available, and enforces that the first
/// frame received is SETTINGS (RFC 9114 §7.2.4).
#[derive(Debug, Default)]
pub struct ControlStreamReader {
    pending: BytesMut,
    seen_settings: bool,
}

impl ControlStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly received bytes and drains every complete frame now
    /// available. Frames with GREASE/unknown types are surfaced as
    /// `Frame::Unknown` for the caller to silently ignore, matching RFC
    /// 9114 §9's "MUST be ignored" rule for unknown control-stream frames.
    pub fn receive(&mut self, bytes: &[u8]) -> H3Result<Vec<Frame>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            let mut cursor = self.pending.clone().freeze();
            let before = cursor.remaining();
            match Frame::decode(&mut cursor)? {
                None => break,
                Some(frame) => {
                    let consumed = before - cursor.remaining();
                    self.pending.advance(consumed);
                    self.validate(&frame)?;
                    out.push(frame);
                }
            }
        }
        Ok(out)
    }

    fn validate(&mut self, frame: &Frame) -> H3Result<()> {
        if !self.seen_settings {
            if !matches!(frame, Frame::Settings { .. }) {
                return Err(H3DecodeError::MissingSettings);
            }
            self.seen_settings = true;
            return Ok(());
        }
        match frame {
            Frame::Data { .. } | Frame::Headers { .. } | Frame::PushPromise { .. } => {
                Err(H3DecodeError::FrameUnexpected(frame.frame_type()))
            }
            Frame::Settings { .. } => Err(H3DecodeError::FrameUnexpected(frame::FRAME_SETTINGS)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_each_mandatory_stream_role() {
        let mut control = Bytes::from(build_control_stream_prefix(&[]));
        assert_eq!(identify_stream(&mut control).unwrap(), Some(StreamRole::Control));

        let mut enc = Bytes::from(build_qpack_encoder_stream_prefix());
        assert_eq!(identify_stream(&mut enc).unwrap(), Some(StreamRole::QpackEncoder));

        let mut dec = Bytes::from(build_qpack_decoder_stream_prefix());
        assert_eq!(identify_stream(&mut dec).unwrap(), Some(StreamRole::QpackDecoder));
    }

    #[test]
    fn unknown_stream_type_is_not_an_error() {
        let mut buf = BytesMut::new();
        VarInt::from_u64(0x44).unwrap().encode(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(identify_stream(&mut bytes).unwrap(), Some(StreamRole::Unknown(0x44)));
    }

    #[test]
    fn control_stream_rejects_non_settings_first_frame() {
        let mut reader = ControlStreamReader::new();
        let mut buf = BytesMut::new();
        Frame::Goaway { id: 0 }.encode(&mut buf);
        assert!(matches!(
            reader.receive(&buf),
            Err(H3DecodeError::MissingSettings)
        ));
    }

    #[test]
    fn control_stream_accepts_settings_then_goaway() {
        let mut reader = ControlStreamReader::new();
        let mut buf = BytesMut::new();
        Frame::Settings {
            params: vec![SettingsParam {
                id: frame::SETTINGS_MAX_FIELD_SECTION_SIZE,
                value: 16384,
            }],
        }
        .encode(&mut buf);
        Frame::Goaway { id: 8 }.encode(&mut buf);
        let frames = reader.receive(&buf).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Frame::Goaway { id: 8 }));
    }

    #[test]
    fn control_stream_rejects_headers_frame_after_settings() {
        let mut reader = ControlStreamReader::new();
        let mut buf = BytesMut::new();
        Frame::Settings { params: vec![] }.encode(&mut buf);
        reader.receive(&buf).unwrap();
        let mut headers_buf = BytesMut::new();
        Frame::Headers {
            block: Bytes::from_static(b"x"),
        }
        .encode(&mut headers_buf);
        assert!(matches!(
            reader.receive(&headers_buf),
            Err(H3DecodeError::FrameUnexpected(t)) if t == frame::FRAME_HEADERS
        ));
    }

    #[test]
    fn partial_frame_bytes_are_buffered_across_receive_calls() {
        let mut reader = ControlStreamReader::new();
        let mut buf = BytesMut::new();
        Frame::Settings { params: vec![] }.encode(&mut buf);
        Frame::Goaway { id: 5 }.encode(&mut buf);
        let whole = buf.freeze();
        let (first_half, second_half) = whole.split_at(whole.len() - 1);
        assert!(reader.receive(first_half).unwrap().len() >= 1);
        let frames = reader.receive(second_half).unwrap();
        assert!(frames.iter().any(|f| matches!(f, Frame::Goaway { id: 5 })));
    }
}
