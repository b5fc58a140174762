//! qlog event taxonomy: connectivity, transport, and recovery categories,
//! adapted from `connectivity_events.h` / `transport_events.h` /
//! `recovery_events.h`. Each event carries a microsecond timestamp, a
//! dotted category:name string, and a payload serialized through `serde`
//! rather than hand-rolled `ToJson()` string building.

use serde::Serialize;

pub const NAME_CONNECTION_STARTED: &str = "quic:connection_started";
pub const NAME_CONNECTION_CLOSED: &str = "quic:connection_closed";
pub const NAME_CONNECTION_STATE_UPDATED: &str = "quic:connection_state_updated";
pub const NAME_PACKET_SENT: &str = "quic:packet_sent";
pub const NAME_PACKET_RECEIVED: &str = "quic:packet_received";
pub const NAME_PACKETS_ACKED: &str = "quic:packets_acked";
pub const NAME_STREAM_STATE_UPDATED: &str = "quic:stream_state_updated";
pub const NAME_RECOVERY_METRICS_UPDATED: &str = "recovery:metrics_updated";
pub const NAME_CONGESTION_STATE_UPDATED: &str = "recovery:congestion_state_updated";
pub const NAME_PACKET_LOST: &str = "recovery:packet_lost";

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStarted {
    pub ip_version: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub protocol: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_cid: String,
    pub dst_cid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionClosed {
    pub error_code: u64,
    pub reason: String,
    /// "clean", "application", "error", or "stateless_reset".
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStateUpdated {
    #[serde(rename = "old")]
    pub old_state: String,
    #[serde(rename = "new")]
    pub new_state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketHeader {
    pub packet_number: u64,
    pub packet_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub frame_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawInfo {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketSent {
    pub packet_type: String,
    pub header: PacketHeader,
    pub frames: Vec<FrameInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketReceived {
    pub packet_type: String,
    pub header: PacketHeader,
    pub frames: Vec<FrameInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketsAcked {
    pub acked_ranges: Vec<(u64, u64)>,
    pub ack_delay: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketLost {
    pub packet_number: u64,
    pub packet_type: String,
    /// "time_threshold", "packet_threshold", or "pto_expired".
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStateUpdated {
    pub stream_id: u64,
    #[serde(rename = "old")]
    pub old_state: String,
    #[serde(rename = "new")]
    pub new_state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryMetricsUpdated {
    #[serde(rename = "min_rtt")]
    pub min_rtt_us: u32,
    #[serde(rename = "smoothed_rtt")]
    pub smoothed_rtt_us: u32,
    #[serde(rename = "latest_rtt")]
    pub latest_rtt_us: u32,
    #[serde(rename = "rtt_variance")]
    pub rtt_variance_us: u32,
    #[serde(rename = "cwnd")]
    pub cwnd_bytes: u64,
    pub bytes_in_flight: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssthresh: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "pacing_rate")]
    pub pacing_rate_bps: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CongestionStateUpdated {
    #[serde(rename = "old")]
    pub old_state: String,
    #[serde(rename = "new")]
    pub new_state: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventData {
    ConnectionStarted(ConnectionStarted),
    ConnectionClosed(ConnectionClosed),
    ConnectionStateUpdated(ConnectionStateUpdated),
    PacketSent(PacketSent),
    PacketReceived(PacketReceived),
    PacketsAcked(PacketsAcked),
    PacketLost(PacketLost),
    StreamStateUpdated(StreamStateUpdated),
    RecoveryMetricsUpdated(RecoveryMetricsUpdated),
    CongestionStateUpdated(CongestionStateUpdated),
}

impl EventData {
    pub fn name(&self) -> &'static str {
        match self {
            EventData::ConnectionStarted(_) => NAME_CONNECTION_STARTED,
            EventData::ConnectionClosed(_) => NAME_CONNECTION_CLOSED,
            EventData::ConnectionStateUpdated(_) => NAME_CONNECTION_STATE_UPDATED,
            EventData::PacketSent(_) => NAME_PACKET_SENT,
            EventData::PacketReceived(_) => NAME_PACKET_RECEIVED,
            EventData::PacketsAcked(_) => NAME_PACKETS_ACKED,
            EventData::PacketLost(_) => NAME_PACKET_LOST,
            EventData::StreamStateUpdated(_) => NAME_STREAM_STATE_UPDATED,
            EventData::RecoveryMetricsUpdated(_) => NAME_RECOVERY_METRICS_UPDATED,
            EventData::CongestionStateUpdated(_) => NAME_CONGESTION_STATE_UPDATED,
        }
    }
}

/// One qlog record: a timestamp, its dotted name, and its payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub time_us: u64,
    pub name: &'static str,
    pub data: EventData,
}

impl Event {
    pub fn new(time_us: u64, data: EventData) -> Self {
        Event {
            time_us,
            name: data.name(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_matches_its_data_variant() {
        let event = Event::new(
            0,
            EventData::PacketLost(PacketLost {
                packet_number: 3,
                packet_type: "1RTT".to_string(),
                trigger: "time_threshold".to_string(),
            }),
        );
        assert_eq!(event.name, NAME_PACKET_LOST);
    }

    #[test]
    fn recovery_metrics_json_drops_unit_suffix_and_omits_absent_optionals() {
        let data = EventData::RecoveryMetricsUpdated(RecoveryMetricsUpdated {
            min_rtt_us: 10_000,
            smoothed_rtt_us: 12_000,
            latest_rtt_us: 11_000,
            rtt_variance_us: 500,
            cwnd_bytes: 65536,
            bytes_in_flight: 4096,
            ssthresh: None,
            pacing_rate_bps: None,
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["min_rtt"], 10_000);
        assert!(json.get("ssthresh").is_none());
        assert!(json.get("pacing_rate").is_none());
    }

    #[test]
    fn packets_acked_ranges_serialize_as_pair_arrays() {
        let data = EventData::PacketsAcked(PacketsAcked {
            acked_ranges: vec![(0, 4), (6, 6)],
            ack_delay: 250,
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["acked_ranges"][0], serde_json::json!([0, 4]));
    }
}
