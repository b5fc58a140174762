//! Request/response field-section assembly (RFC 9114 §4).
//! A request is a HEADERS frame, optional DATA frames, and an optional
//! trailer HEADERS frame; a response mirrors it with `:status` in place of
//! the request pseudo-headers. This module validates pseudo-header
//! placement and wires header (de)compression through `qd-qpack`.

use crate::error::{H3DecodeError, H3Result};
use crate::frame::Frame;
use bytes::{Buf, Bytes, BytesMut};
use qd_qpack::{Decoder, Encoder};

pub const REQUEST_PSEUDO_HEADERS: &[&str] = &[":method", ":scheme", ":authority", ":path"];
pub const RESPONSE_PSEUDO_HEADERS: &[&str] = &[":status"];

fn is_pseudo(name: &str) -> bool {
    name.starts_with(':')
}

/// RFC 9114 §4.3: all pseudo-header fields MUST appear before regular
/// fields, and trailers MUST NOT carry pseudo-headers at all. `allowed`
/// names the pseudo-headers valid for this message kind.
fn validate_field_order(fields: &[(String, String)], allowed: &[&str]) -> H3Result<()> {
    let mut seen_regular = false;
    for (name, _) in fields {
        if is_pseudo(name.as_str()) {
            if seen_regular {
                return Err(H3DecodeError::PseudoHeaderAfterRegular);
            }
            if !allowed.contains(&name.as_str()) {
                return Err(H3DecodeError::UnexpectedPseudoHeader(name.clone()));
            }
        } else {
            seen_regular = true;
        }
    }
    Ok(())
}

fn require_pseudo(fields: &[(String, String)], name: &'static str) -> H3Result<()> {
    if fields.iter().any(|(n, _)| n == name) {
        Ok(())
    } else {
        Err(H3DecodeError::MissingPseudoHeader(name))
    }
}

pub fn validate_request_headers(fields: &[(String, String)]) -> H3Result<()> {
    validate_field_order(fields, REQUEST_PSEUDO_HEADERS)?;
    require_pseudo(fields, ":method")?;
    require_pseudo(fields, ":scheme")?;
    require_pseudo(fields, ":path")?;
    Ok(())
}

pub fn validate_response_headers(fields: &[(String, String)]) -> H3Result<()> {
    validate_field_order(fields, RESPONSE_PSEUDO_HEADERS)?;
    require_pseudo(fields, ":status")?;
    Ok(())
}

pub fn validate_trailer_fields(fields: &[(String, String)]) -> H3Result<()> {
    validate_field_order(fields, &[])
}

/// Builds `(":method", ...), (":scheme", ...), (":authority", ...),
/// (":path", ...)` followed by `extra`, in the pseudo-header-first order
/// RFC 9114 requires.
pub fn build_request_fields(
    method: &str,
    scheme: &str,
    authority: &str,
    path: &str,
    extra: &[(String, String)],
) -> Vec<(String, String)> {
    let mut fields = vec![
        (":method".to_string(), method.to_string()),
        (":scheme".to_string(), scheme.to_string()),
        (":authority".to_string(), authority.to_string()),
        (":path".to_string(), path.to_string()),
    ];
    fields.extend(extra.iter().cloned());
    fields
}

pub fn build_response_fields(status: u16, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut fields = vec![(":status".to_string(), status.to_string())];
    fields.extend(extra.iter().cloned());
    fields
}

/// Encodes a HEADERS frame for `fields` via `encoder`, returning
/// `(encoder_stream_bytes, request_stream_bytes)` — the first goes out on
/// the connection's QPACK encoder stream, the second is the HEADERS frame
/// itself, ready to append to the request/response stream.
pub fn encode_headers_frame(
    encoder: &mut Encoder,
    stream_id: u64,
    fields: &[(String, String)],
) -> H3Result<(Vec<u8>, Vec<u8>)> {
    let (encoder_stream, block) = encoder.encode_header_block(stream_id, fields)?;
    let mut frame_bytes = BytesMut::new();
    Frame::Headers {
        block: Bytes::from(block),
    }
    .encode(&mut frame_bytes);
    Ok((encoder_stream, frame_bytes.to_vec()))
}

pub fn encode_data_frame(data: Bytes) -> Vec<u8> {
    let mut out = BytesMut::new();
    Frame::Data { data }.encode(&mut out);
    out.to_vec()
}

/// One parsed event off a request or response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Headers(Vec<(String, String)>),
    Data(Bytes),
    Trailers(Vec<(String, String)>),
}

/// Per-stream message assembler. Tracks whether the leading HEADERS and an
/// optional trailer HEADERS have been seen, so a second non-trailer HEADERS
/// or any frame after the trailer is rejected (RFC 9114 §4.1).
#[derive(Debug)]
pub struct MessageAssembler {
    stream_id: u64,
    pending: BytesMut,
    headers_seen: bool,
    trailers_seen: bool,
    is_request: bool,
}

impl MessageAssembler {
    pub fn new(stream_id: u64, is_request: bool) -> Self {
        MessageAssembler {
            stream_id,
            pending: BytesMut::new(),
            headers_seen: false,
            trailers_seen: false,
            is_request,
        }
    }

    /// Feeds newly received stream bytes, decoding every complete frame.
    /// A HEADERS frame that is QPACK-blocked yields no event here; the
    /// caller re-polls once `decoder.apply_encoder_instructions` unblocks
    /// it (the decoder tracks blocked blocks by `stream_id` across calls).
    pub fn receive(&mut self, bytes: &[u8], decoder: &mut Decoder) -> H3Result<Vec<MessageEvent>> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            let mut cursor = self.pending.clone().freeze();
            let before = cursor.remaining();
            match Frame::decode(&mut cursor)? {
                None => break,
                Some(frame) => {
                    let consumed = before - cursor.remaining();
                    self.pending.advance(consumed);
                    if self.trailers_seen {
                        return Err(H3DecodeError::FrameUnexpected(frame.frame_type()));
                    }
                    match frame {
                        Frame::Data { data } => {
                            if !self.headers_seen {
                                return Err(H3DecodeError::FrameUnexpected(crate::frame::FRAME_DATA));
                            }
                            events.push(MessageEvent::Data(data));
                        }
                        Frame::Headers { block } => {
                            if let Some(fields) = decoder.decode_header_block(self.stream_id, &block)? {
                                events.push(self.accept_field_section(fields)?);
                            }
                            // `None` means QPACK blocked this section on an
                            // insertion that hasn't arrived yet; the decoder
                            // buffers it internally and will hand it back
                            // keyed by `stream_id` from a later
                            // `apply_encoder_instructions` call, which the
                            // caller routes to `on_qpack_ready`.
                        }
                        other => return Err(H3DecodeError::FrameUnexpected(other.frame_type())),
                    }
                }
            }
        }
        Ok(events)
    }

    /// Delivers a field section the QPACK decoder had previously blocked on
    /// this stream and has now unblocked (see the `apply_encoder_instructions`
    /// return value). Applies the same headers-then-trailers validation as
    /// the direct path in `receive`.
    pub fn on_qpack_ready(&mut self, fields: Vec<(String, String)>) -> H3Result<MessageEvent> {
        self.accept_field_section(fields)
    }

    fn accept_field_section(&mut self, fields: Vec<(String, String)>) -> H3Result<MessageEvent> {
        if !self.headers_seen {
            if self.is_request {
                validate_request_headers(&fields)?;
            } else {
                validate_response_headers(&fields)?;
            }
            self.headers_seen = true;
            Ok(MessageEvent::Headers(fields))
        } else {
            validate_trailer_fields(&fields)?;
            self.trailers_seen = true;
            Ok(MessageEvent::Trailers(fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_fields_are_built_pseudo_first() {
        let fields = build_request_fields("GET", "https", "example.com", "/", &[("x-a".into(), "b".into())]);
        validate_request_headers(&fields).unwrap();
    }

    #[test]
    fn response_requires_status_pseudo_header() {
        let fields = vec![("content-length".to_string(), "0".to_string())];
        assert!(matches!(
            validate_response_headers(&fields),
            Err(H3DecodeError::MissingPseudoHeader(":status"))
        ));
    }

    #[test]
    fn pseudo_header_after_regular_header_is_rejected() {
        let fields = vec![
            ("content-length".to_string(), "0".to_string()),
            (":status".to_string(), "200".to_string()),
        ];
        assert!(matches!(
            validate_field_order(&fields, RESPONSE_PSEUDO_HEADERS),
            Err(H3DecodeError::PseudoHeaderAfterRegular)
        ));
    }

    #[test]
    fn trailers_reject_any_pseudo_header() {
        let fields = vec![(":status".to_string(), "200".to_string())];
        assert!(validate_trailer_fields(&fields).is_err());
    }

    #[test]
    fn message_assembler_emits_headers_then_data() {
        let mut encoder = Encoder::new(4096, 16);
        let mut decoder = Decoder::new(4096);
        let fields = build_request_fields("GET", "https", "example.com", "/", &[]);
        let (encoder_stream, headers_frame) = encode_headers_frame(&mut encoder, 0, &fields).unwrap();
        decoder.apply_encoder_instructions(&encoder_stream).unwrap();

        let mut assembler = MessageAssembler::new(0, true);
        let mut stream_bytes = headers_frame;
        stream_bytes.extend(encode_data_frame(Bytes::from_static(b"body")));

        let events = assembler.receive(&stream_bytes, &mut decoder).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MessageEvent::Headers(f) if f == &fields));
        assert!(matches!(&events[1], MessageEvent::Data(d) if d == &Bytes::from_static(b"body")));
    }

    #[test]
    fn data_before_headers_is_rejected() {
        let mut decoder = Decoder::new(4096);
        let mut assembler = MessageAssembler::new(0, true);
        let data_frame = encode_data_frame(Bytes::from_static(b"oops"));
        assert!(matches!(
            assembler.receive(&data_frame, &mut decoder),
            Err(H3DecodeError::FrameUnexpected(_))
        ));
    }
}
