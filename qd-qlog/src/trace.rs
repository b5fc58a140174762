//! Per-connection qlog trace: owns the connection's identity and common
//! fields, applies event filtering, and forwards accepted events to a
//! shared [`Writer`]. A connection is pinned to one worker thread for its
//! lifetime, so `Trace` itself carries no internal locking — the only
//! cross-thread boundary is the channel send inside `Writer`.

use crate::config::{CommonFields, QlogConfig, VantagePoint};
use crate::event::{
    ConnectionClosed, ConnectionStarted, ConnectionStateUpdated, CongestionStateUpdated, Event,
    EventData, PacketLost, PacketReceived, PacketSent, PacketsAcked, RecoveryMetricsUpdated,
    StreamStateUpdated,
};
use crate::writer::Writer;

pub struct Trace {
    connection_id: String,
    config: QlogConfig,
    writer: Writer,
    event_count: u64,
}

impl Trace {
    pub fn new(
        connection_id: String,
        vantage_point: VantagePoint,
        common_fields: CommonFields,
        config: QlogConfig,
        writer: Writer,
    ) -> Self {
        writer.write_header(&connection_id, vantage_point, &common_fields);
        Trace {
            connection_id,
            config,
            writer,
            event_count: 0,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Logs any event, applying the whitelist/blacklist filter. Returns
    /// whether it was actually forwarded to the writer (useful in tests).
    pub fn log_event(&mut self, time_us: u64, data: EventData) -> bool {
        let event = Event::new(time_us, data);
        if !self.config.should_log(event.name) {
            return false;
        }
        self.event_count += 1;
        self.writer.write_event(&self.connection_id, event);
        true
    }

    pub fn log_connection_started(&mut self, time_us: u64, data: ConnectionStarted) -> bool {
        self.log_event(time_us, EventData::ConnectionStarted(data))
    }

    pub fn log_connection_closed(&mut self, time_us: u64, data: ConnectionClosed) -> bool {
        self.log_event(time_us, EventData::ConnectionClosed(data))
    }

    pub fn log_connection_state_updated(&mut self, time_us: u64, data: ConnectionStateUpdated) -> bool {
        self.log_event(time_us, EventData::ConnectionStateUpdated(data))
    }

    pub fn log_packet_sent(&mut self, time_us: u64, data: PacketSent) -> bool {
        self.log_event(time_us, EventData::PacketSent(data))
    }

    pub fn log_packet_received(&mut self, time_us: u64, data: PacketReceived) -> bool {
        self.log_event(time_us, EventData::PacketReceived(data))
    }

    pub fn log_packets_acked(&mut self, time_us: u64, data: PacketsAcked) -> bool {
        self.log_event(time_us, EventData::PacketsAcked(data))
    }

    pub fn log_packet_lost(&mut self, time_us: u64, data: PacketLost) -> bool {
        self.log_event(time_us, EventData::PacketLost(data))
    }

    pub fn log_stream_state_updated(&mut self, time_us: u64, data: StreamStateUpdated) -> bool {
        self.log_event(time_us, EventData::StreamStateUpdated(data))
    }

    pub fn log_recovery_metrics_updated(&mut self, time_us: u64, data: RecoveryMetricsUpdated) -> bool {
        self.log_event(time_us, EventData::RecoveryMetricsUpdated(data))
    }

    pub fn log_congestion_state_updated(&mut self, time_us: u64, data: CongestionStateUpdated) -> bool {
        self.log_event(time_us, EventData::CongestionStateUpdated(data))
    }

    pub fn flush(&self) {
        self.writer.flush();
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        self.writer.close_connection(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_writer() -> Writer {
        Writer::new(QlogConfig::default())
    }

    #[test]
    fn disabled_trace_counts_nothing_and_never_touches_the_writer() {
        let mut trace = Trace::new(
            "conn-x".to_string(),
            VantagePoint::Server,
            CommonFields::quic(),
            QlogConfig::default(),
            disabled_writer(),
        );
        let logged = trace.log_packet_lost(
            0,
            PacketLost {
                packet_number: 1,
                packet_type: "1RTT".to_string(),
                trigger: "time_threshold".to_string(),
            },
        );
        // A disabled writer still accepts the event at the Trace level
        // (filtering is independent of whether the sink is live); the
        // writer itself discards it without touching disk.
        assert!(logged);
        assert_eq!(trace.event_count(), 1);
    }

    #[test]
    fn blacklisted_event_is_not_counted() {
        let mut config = QlogConfig::default();
        config.event_blacklist.push(crate::event::NAME_PACKET_LOST.to_string());
        let mut trace = Trace::new(
            "conn-y".to_string(),
            VantagePoint::Client,
            CommonFields::quic(),
            config,
            disabled_writer(),
        );
        let logged = trace.log_packet_lost(
            0,
            PacketLost {
                packet_number: 1,
                packet_type: "1RTT".to_string(),
                trigger: "time_threshold".to_string(),
            },
        );
        assert!(!logged);
        assert_eq!(trace.event_count(), 0);
    }
}
