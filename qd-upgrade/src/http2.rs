//! HTTP/2 ALTSVC frame construction (RFC 7838 §4): advertises HTTP/3 to a
//! detected HTTP/2 peer by sending an `Alt-Svc` frame on the control stream
//! rather than a header line.

const FRAME_TYPE_ALTSVC: u8 = 0x0a;

/// Builds a complete ALTSVC frame: the 9-byte HTTP/2 frame header followed
/// by a 2-byte origin length, the origin (empty when scoped to the current
/// connection's origin per RFC 7838 §4), and the `Alt-Svc` field value.
pub fn build_altsvc_frame(stream_id: u32, origin: &str, alt_value: &str) -> Vec<u8> {
    let origin_bytes = origin.as_bytes();
    let payload_len = 2 + origin_bytes.len() + alt_value.len();

    let mut frame = Vec::with_capacity(9 + payload_len);
    frame.push((payload_len >> 16) as u8);
    frame.push((payload_len >> 8) as u8);
    frame.push(payload_len as u8);
    frame.push(FRAME_TYPE_ALTSVC);
    frame.push(0); // flags
    frame.extend_from_slice(&stream_id.to_be_bytes());

    frame.extend_from_slice(&(origin_bytes.len() as u16).to_be_bytes());
    frame.extend_from_slice(origin_bytes);
    frame.extend_from_slice(alt_value.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn altsvc_frame_header_encodes_length_and_type() {
        let frame = build_altsvc_frame(0, "", "h3=\":443\"");
        let payload_len = ((frame[0] as usize) << 16) | ((frame[1] as usize) << 8) | frame[2] as usize;
        assert_eq!(payload_len, frame.len() - 9);
        assert_eq!(frame[3], FRAME_TYPE_ALTSVC);
        assert_eq!(frame[4], 0);
        assert_eq!(u32::from_be_bytes(frame[5..9].try_into().unwrap()), 0);
    }

    #[test]
    fn altsvc_frame_carries_origin_length_prefix() {
        let frame = build_altsvc_frame(0, "example.com", "h3=\":443\"");
        let origin_len = u16::from_be_bytes(frame[9..11].try_into().unwrap()) as usize;
        assert_eq!(origin_len, "example.com".len());
        assert_eq!(&frame[11..11 + origin_len], b"example.com");
        assert_eq!(&frame[11 + origin_len..], b"h3=\":443\"");
    }
}
