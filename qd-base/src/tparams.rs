//! Transport parameters exchanged via the TLS "quic_transport_parameters"
//! extension (RFC 9000 §7.4, §18).

use crate::cid::{ConnectionId, StatelessResetToken};
use crate::error::{QuicError, Result};
use crate::varint::VarInt;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone)]
pub struct TransportParameters {
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub max_idle_timeout_ms: u64,
    pub max_udp_payload_size: u64,
    pub ack_delay_exponent: u8,
    pub max_ack_delay_ms: u64,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    pub original_destination_connection_id: Option<ConnectionId>,
    pub stateless_reset_token: Option<StatelessResetToken>,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            max_idle_timeout_ms: 0,
            max_udp_payload_size: 65527,
            ack_delay_exponent: 3,
            max_ack_delay_ms: 25,
            disable_active_migration: false,
            active_connection_id_limit: 2,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            original_destination_connection_id: None,
            stateless_reset_token: None,
        }
    }
}

/// Transport parameter identifiers, RFC 9000 §18.2.
mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;
}

impl TransportParameters {
    /// Validates field ranges (RFC 9000 §18.2) before the parameters are
    /// authenticated into a connection.
    pub fn validate(&self) -> Result<()> {
        if !(1200..=65527).contains(&self.max_udp_payload_size) {
            return Err(QuicError::TransportParameter(
                "max_udp_payload_size out of [1200, 65527]".into(),
            ));
        }
        if self.ack_delay_exponent > 20 {
            return Err(QuicError::TransportParameter(
                "ack_delay_exponent exceeds 20".into(),
            ));
        }
        if self.max_ack_delay_ms >= (1 << 14) {
            return Err(QuicError::TransportParameter(
                "max_ack_delay_ms exceeds 2^14".into(),
            ));
        }
        if self.active_connection_id_limit < 2 {
            return Err(QuicError::TransportParameter(
                "active_connection_id_limit must be >= 2".into(),
            ));
        }
        Ok(())
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        encode_varint_param(out, id::INITIAL_MAX_DATA, self.initial_max_data);
        encode_varint_param(
            out,
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        encode_varint_param(
            out,
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        encode_varint_param(
            out,
            id::INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        encode_varint_param(out, id::INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        encode_varint_param(out, id::INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        encode_varint_param(out, id::MAX_IDLE_TIMEOUT, self.max_idle_timeout_ms);
        encode_varint_param(out, id::MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        encode_varint_param(out, id::ACK_DELAY_EXPONENT, self.ack_delay_exponent as u64);
        encode_varint_param(out, id::MAX_ACK_DELAY, self.max_ack_delay_ms);
        encode_varint_param(
            out,
            id::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        if self.disable_active_migration {
            encode_empty_param(out, id::DISABLE_ACTIVE_MIGRATION);
        }
        if let Some(cid) = &self.initial_source_connection_id {
            encode_bytes_param(out, id::INITIAL_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
        if let Some(cid) = &self.retry_source_connection_id {
            encode_bytes_param(out, id::RETRY_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
        if let Some(cid) = &self.original_destination_connection_id {
            encode_bytes_param(
                out,
                id::ORIGINAL_DESTINATION_CONNECTION_ID,
                cid.as_bytes(),
            );
        }
        if let Some(token) = &self.stateless_reset_token {
            encode_bytes_param(out, id::STATELESS_RESET_TOKEN, token);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let mut tp = TransportParameters::default();
        while buf.has_remaining() {
            let key = VarInt::decode_for_packet(buf)
                .map_err(|_| QuicError::TransportParameter("truncated parameter id".into()))?
                .into_inner();
            let len = VarInt::decode_for_packet(buf)
                .map_err(|_| QuicError::TransportParameter("truncated parameter length".into()))?
                .as_usize();
            if buf.remaining() < len {
                return Err(QuicError::TransportParameter(
                    "parameter value truncated".into(),
                ));
            }
            let mut value = buf.copy_to_bytes(len);
            match key {
                id::INITIAL_MAX_DATA => tp.initial_max_data = read_varint(&mut value)?,
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    tp.initial_max_stream_data_bidi_local = read_varint(&mut value)?
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    tp.initial_max_stream_data_bidi_remote = read_varint(&mut value)?
                }
                id::INITIAL_MAX_STREAM_DATA_UNI => {
                    tp.initial_max_stream_data_uni = read_varint(&mut value)?
                }
                id::INITIAL_MAX_STREAMS_BIDI => {
                    tp.initial_max_streams_bidi = read_varint(&mut value)?
                }
                id::INITIAL_MAX_STREAMS_UNI => {
                    tp.initial_max_streams_uni = read_varint(&mut value)?
                }
                id::MAX_IDLE_TIMEOUT => tp.max_idle_timeout_ms = read_varint(&mut value)?,
                id::MAX_UDP_PAYLOAD_SIZE => tp.max_udp_payload_size = read_varint(&mut value)?,
                id::ACK_DELAY_EXPONENT => tp.ack_delay_exponent = read_varint(&mut value)? as u8,
                id::MAX_ACK_DELAY => tp.max_ack_delay_ms = read_varint(&mut value)?,
                id::ACTIVE_CONNECTION_ID_LIMIT => {
                    tp.active_connection_id_limit = read_varint(&mut value)?
                }
                id::DISABLE_ACTIVE_MIGRATION => tp.disable_active_migration = true,
                id::INITIAL_SOURCE_CONNECTION_ID => {
                    tp.initial_source_connection_id = Some(ConnectionId::new(value.to_vec()))
                }
                id::RETRY_SOURCE_CONNECTION_ID => {
                    tp.retry_source_connection_id = Some(ConnectionId::new(value.to_vec()))
                }
                id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                    tp.original_destination_connection_id = Some(ConnectionId::new(value.to_vec()))
                }
                id::STATELESS_RESET_TOKEN => {
                    if value.len() == 16 {
                        let mut token = [0u8; 16];
                        token.copy_from_slice(&value);
                        tp.stateless_reset_token = Some(token);
                    }
                }
                _ => { /* unknown transport parameter: ignore per RFC 9000 §7.4.1 */ }
            }
        }
        tp.validate()?;
        Ok(tp)
    }
}

fn read_varint(buf: &mut impl Buf) -> Result<u64> {
    VarInt::decode_for_packet(buf)
        .map(VarInt::into_inner)
        .map_err(|_| QuicError::TransportParameter("malformed varint-valued parameter".into()))
}

fn encode_varint_param(out: &mut impl BufMut, key: u64, value: u64) {
    let vi = VarInt::from_u64(value).expect("transport parameter value exceeds varint range");
    VarInt::from_u64_unchecked(key).encode(out);
    VarInt::from_u64_unchecked(vi.encoded_len() as u64).encode(out);
    vi.encode(out);
}

fn encode_empty_param(out: &mut impl BufMut, key: u64) {
    VarInt::from_u64_unchecked(key).encode(out);
    VarInt::ZERO.encode(out);
}

fn encode_bytes_param(out: &mut impl BufMut, key: u64, value: &[u8]) {
    VarInt::from_u64_unchecked(key).encode(out);
    VarInt::from_u64(value.len() as u64)
        .expect("parameter value too long")
        .encode(out);
    out.put_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut tp = TransportParameters::default();
        tp.initial_max_data = 1_000_000;
        tp.initial_max_streams_bidi = 100;
        tp.disable_active_migration = true;
        tp.initial_source_connection_id = Some(ConnectionId::new(vec![1, 2, 3, 4]));
        tp.stateless_reset_token = Some([9u8; 16]);

        let mut buf = BytesMut::new();
        tp.encode(&mut buf);
        let mut cursor = buf.freeze();
        let decoded = TransportParameters::decode(&mut cursor).unwrap();

        assert_eq!(decoded.initial_max_data, 1_000_000);
        assert_eq!(decoded.initial_max_streams_bidi, 100);
        assert!(decoded.disable_active_migration);
        assert_eq!(
            decoded.initial_source_connection_id.unwrap().as_bytes(),
            &[1, 2, 3, 4]
        );
        assert_eq!(decoded.stateless_reset_token, Some([9u8; 16]));
    }

    #[test]
    fn unknown_parameter_is_skipped_not_fatal() {
        let mut buf = BytesMut::new();
        // an unregistered (grease) transport parameter id
        encode_bytes_param(&mut buf, 0xfff0, b"ignored");
        encode_varint_param(&mut buf, id::INITIAL_MAX_DATA, 42);
        let mut cursor = buf.freeze();
        let decoded = TransportParameters::decode(&mut cursor).unwrap();
        assert_eq!(decoded.initial_max_data, 42);
    }

    #[test]
    fn validate_rejects_out_of_range_payload_size() {
        let mut tp = TransportParameters::default();
        tp.max_udp_payload_size = 100;
        assert!(tp.validate().is_err());
    }
}
