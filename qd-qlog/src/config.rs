//! qlog configuration: output location, batching/flush cadence, and event
//! filtering for the optional tracer interface.

use std::path::PathBuf;

/// Where in the connection this endpoint sits, recorded once per trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VantagePoint {
    Client,
    Server,
    Network,
    Unknown,
}

impl VantagePoint {
    pub fn as_str(self) -> &'static str {
        match self {
            VantagePoint::Client => "client",
            VantagePoint::Server => "server",
            VantagePoint::Network => "network",
            VantagePoint::Unknown => "unknown",
        }
    }
}

/// Fields shared by every event on a trace, written once into the trace
/// header instead of being repeated per event.
#[derive(Debug, Clone, Default)]
pub struct CommonFields {
    pub protocol_type: String,
    pub group_id: Option<String>,
}

impl CommonFields {
    pub fn quic() -> Self {
        CommonFields {
            protocol_type: "QUIC".to_string(),
            group_id: None,
        }
    }
}

/// Injected at endpoint construction — never read from a global.
#[derive(Debug, Clone)]
pub struct QlogConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    /// Event names to log; empty means log everything not blacklisted.
    pub event_whitelist: Vec<String>,
    pub event_blacklist: Vec<String>,
    /// Fraction of connections to trace, in `[0.0, 1.0]`.
    pub sampling_rate: f32,
}

impl Default for QlogConfig {
    fn default() -> Self {
        QlogConfig {
            enabled: false,
            output_dir: PathBuf::from("./qlogs"),
            flush_interval_ms: 100,
            batch_size: 1000,
            event_whitelist: Vec::new(),
            event_blacklist: Vec::new(),
            sampling_rate: 1.0,
        }
    }
}

impl QlogConfig {
    pub fn should_log(&self, event_name: &str) -> bool {
        if !self.event_whitelist.is_empty() && !self.event_whitelist.iter().any(|n| n == event_name) {
            return false;
        }
        !self.event_blacklist.iter().any(|n| n == event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_excludes_everything_not_named() {
        let mut cfg = QlogConfig::default();
        cfg.event_whitelist.push("quic:packet_sent".to_string());
        assert!(cfg.should_log("quic:packet_sent"));
        assert!(!cfg.should_log("quic:packet_received"));
    }

    #[test]
    fn blacklist_excludes_only_named_events() {
        let mut cfg = QlogConfig::default();
        cfg.event_blacklist.push("quic:packet_received".to_string());
        assert!(cfg.should_log("quic:packet_sent"));
        assert!(!cfg.should_log("quic:packet_received"));
    }
}
