//! Endpoint configuration: every knob an `Endpoint` needs at construction,
//! translated into the lower-level types each crate already defines
//! (`TransportParameters`, `CongestionController`, `QlogConfig`).

use qd_base::tparams::TransportParameters;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionAlgorithm {
    NewReno,
    Cubic,
    Bbr,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("alpn_list must not be empty")]
    EmptyAlpnList,
    #[error("max_udp_payload_size must be in [1200, 65527]")]
    PayloadSizeOutOfRange,
    #[error("ack_delay_exponent must be <= 20")]
    AckDelayExponentOutOfRange,
    #[error("max_ack_delay_ms must be < 2^14")]
    MaxAckDelayOutOfRange,
    #[error("active_connection_id_limit must be >= 2")]
    ActiveCidLimitTooSmall,
    #[error("worker_count must be >= 1")]
    ZeroWorkers,
    #[error("transport parameter error: {0}")]
    TransportParameter(String),
}

/// The full set of tunables an `Endpoint` exposes for construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub alpn_list: Vec<String>,
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
    pub congestion_algorithm: CongestionAlgorithm,
    pub worker_count: u32,
    pub qpack_max_table_capacity: u64,
    pub qpack_blocked_streams: u64,
    pub session_cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let tp = TransportParameters::default();
        Config {
            alpn_list: vec!["h3".to_string()],
            initial_max_data: 10 << 20,
            initial_max_stream_data_bidi_local: 1 << 20,
            initial_max_stream_data_bidi_remote: 1 << 20,
            initial_max_stream_data_uni: 1 << 20,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            max_idle_timeout_ms: 30_000,
            max_udp_payload_size: tp.max_udp_payload_size,
            ack_delay_exponent: tp.ack_delay_exponent,
            max_ack_delay_ms: tp.max_ack_delay_ms,
            disable_active_migration: false,
            active_connection_id_limit: tp.active_connection_id_limit,
            congestion_algorithm: CongestionAlgorithm::NewReno,
            worker_count: 4,
            qpack_max_table_capacity: 4096,
            qpack_blocked_streams: 16,
            session_cache_dir: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alpn_list.is_empty() {
            return Err(ConfigError::EmptyAlpnList);
        }
        if !(1200..=65527).contains(&self.max_udp_payload_size) {
            return Err(ConfigError::PayloadSizeOutOfRange);
        }
        if self.ack_delay_exponent > 20 {
            return Err(ConfigError::AckDelayExponentOutOfRange);
        }
        if self.max_ack_delay_ms >= (1 << 14) {
            return Err(ConfigError::MaxAckDelayOutOfRange);
        }
        if self.active_connection_id_limit < 2 {
            return Err(ConfigError::ActiveCidLimitTooSmall);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        self.transport_parameters()
            .validate()
            .map_err(|e| ConfigError::TransportParameter(e.to_string()))?;
        Ok(())
    }

    /// Projects this config into the wire-level `TransportParameters` a
    /// `Connection` is constructed with.
    pub fn transport_parameters(&self) -> TransportParameters {
        TransportParameters {
            initial_max_data: self.initial_max_data,
            initial_max_stream_data_bidi_local: self.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: self.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: self.initial_max_stream_data_uni,
            initial_max_streams_bidi: self.initial_max_streams_bidi,
            initial_max_streams_uni: self.initial_max_streams_uni,
            max_idle_timeout_ms: self.max_idle_timeout_ms,
            max_udp_payload_size: self.max_udp_payload_size,
            ack_delay_exponent: self.ack_delay_exponent,
            max_ack_delay_ms: self.max_ack_delay_ms,
            disable_active_migration: self.disable_active_migration,
            active_connection_id_limit: self.active_connection_id_limit,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            original_destination_connection_id: None,
            stateless_reset_token: None,
        }
    }

    pub fn qlog_config(&self, enabled: bool, output_dir: PathBuf) -> qd_qlog::QlogConfig {
        qd_qlog::QlogConfig {
            enabled,
            output_dir,
            ..qd_qlog::QlogConfig::default()
        }
    }
}

/// Builds the congestion controller a connection is constructed with, per
/// [`Config::congestion_algorithm`]. Only New Reno is implemented today;
/// Cubic and BBR fall back to it with a warning rather than silently
/// picking New Reno's behavior without saying so.
pub fn build_congestion_controller(config: &Config) -> Box<dyn qd_recovery::congestion::CongestionController> {
    match config.congestion_algorithm {
        CongestionAlgorithm::NewReno => Box::new(qd_recovery::congestion::NewReno::default()),
        other => {
            tracing::warn!(?other, "congestion algorithm not implemented, falling back to NewReno");
            Box::new(qd_recovery::congestion::NewReno::default())
        }
    }
}

/// Constructs the pair of QPACK encoder/decoder a connection's HTTP/3 layer
/// uses, sized per [`Config::qpack_max_table_capacity`] /
/// [`Config::qpack_blocked_streams`].
pub fn build_qpack_pair(config: &Config) -> (qd_qpack::Encoder, qd_qpack::Decoder) {
    let encoder = qd_qpack::Encoder::new(
        config.qpack_max_table_capacity as usize,
        config.qpack_blocked_streams as usize,
    );
    let decoder = qd_qpack::Decoder::new(config.qpack_max_table_capacity as usize);
    (encoder, decoder)
}
