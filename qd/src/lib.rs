//! QUIC (RFC 9000) + HTTP/3 (RFC 9114) endpoint library: the facade that
//! wires `qd-conn`'s connection state machine, `qd-qpack`'s header
//! compression, `qd-h3`'s framing, and `qd-qlog`'s tracer into
//! `Endpoint`/`Connection` handles, plus `qd-upgrade`'s
//! HTTP/1.1-or-HTTP/2-to-HTTP/3 front-end.

pub mod api;
pub mod config;

pub use api::{Connection, Endpoint, EndpointError, RequestError, StreamMessage};
pub use config::{CongestionAlgorithm, Config, ConfigError};

pub use qd_conn::connection::Role;
pub use qd_conn::stream::StreamKind;

/// Installs a `tracing` subscriber that writes to stdout, honoring
/// `RUST_LOG`. Applications embedding this crate are free to install their
/// own subscriber instead; nothing here assumes one is present.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_builds() {
        Endpoint::new(Config::default(), Role::Client).unwrap();
    }
}
