//! Application-facing API: a `Connection` handle over
//! [`qd_conn::connection::Connection`] plus the HTTP/3 layer wired on top
//! of it, and the `Endpoint` that builds one per dial/accept. A real
//! socket-driven event loop lives in `qd-runtime`; this module is the
//! handle surface application code actually calls.

use crate::config::{build_congestion_controller, build_qpack_pair, Config, ConfigError};
use bytes::Bytes;
use qd_base::tparams::TransportParameters;
use qd_conn::connection::{Action, Connection as CoreConnection, Role};
use qd_conn::path::Path as ConnPath;
use qd_conn::stream::StreamKind;
use qd_h3::control::ControlStreamReader;
use qd_h3::frame::Frame as H3Frame;
use qd_h3::request::{
    build_request_fields, build_response_fields, encode_data_frame, encode_headers_frame, MessageAssembler,
    MessageEvent,
};
use qd_qpack::{Decoder, Encoder};
use qd_qlog::{CommonFields, QlogConfig, Trace, VantagePoint, Writer as QlogWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("the connection has no stream credit available to open a request")]
    NoStreamCredit,
    #[error("http/3 protocol error: {0}")]
    H3(#[from] qd_h3::H3DecodeError),
    #[error("qpack error: {0}")]
    Qpack(#[from] qd_qpack::QpackError),
}

/// Builds connections sharing one [`Config`] and, when qlog is enabled, one
/// background [`QlogWriter`]; sinks are injected at endpoint construction,
/// never reached for globally.
pub struct Endpoint {
    config: Config,
    role: Role,
    qlog_writer: Option<QlogWriter>,
    next_connection_ordinal: u64,
}

impl Endpoint {
    pub fn new(config: Config, role: Role) -> Result<Self, EndpointError> {
        config.validate()?;
        Ok(Endpoint {
            config,
            role,
            qlog_writer: None,
            next_connection_ordinal: 0,
        })
    }

    /// Enables qlog tracing for every connection this endpoint creates from
    /// here on, writing `<output_dir>/<connection id>.qlog`.
    pub fn enable_qlog(&mut self, output_dir: PathBuf) {
        self.qlog_writer = Some(QlogWriter::new(QlogConfig {
            enabled: true,
            output_dir,
            ..QlogConfig::default()
        }));
    }

    /// Builds the CID-to-worker dispatcher this endpoint's workers share,
    /// sized per [`Config::worker_count`]. The dispatcher and its workers
    /// are driven by the caller's own event loop — this handle only hands
    /// out a correctly-sized one.
    pub fn new_dispatcher(&self) -> qd_runtime::Dispatcher {
        qd_runtime::Dispatcher::new(self.config.worker_count as usize)
    }

    /// Binds the HTTP/1.1-or-HTTP/2-to-HTTP/3 upgrade front-end's listener
    /// on `addr`. `token` is the `mio` registry token the caller's poll
    /// loop will see this listener's readiness events under.
    pub fn bind_upgrade_listener(
        &self,
        addr: SocketAddr,
        kind: qd_upgrade::ListenerKind,
        token: mio::Token,
    ) -> std::io::Result<qd_upgrade::UpgradeListener> {
        qd_upgrade::UpgradeListener::bind(addr, kind, token)
    }

    fn vantage_point(&self) -> VantagePoint {
        match self.role {
            Role::Client => VantagePoint::Client,
            Role::Server => VantagePoint::Server,
        }
    }

    fn next_connection_id(&mut self) -> String {
        let ordinal = self.next_connection_ordinal;
        self.next_connection_ordinal += 1;
        format!("{ordinal:016x}")
    }

    /// `dial(addr, alpn, tp_config) -> Handle`. `alpn` is recorded for the
    /// caller's own bookkeeping; actual negotiation happens inside the
    /// `TlsEngine` the connection is wired to.
    pub fn dial(&mut self, addr: SocketAddr, alpn: &str, local_cid_len: usize) -> Connection {
        self.new_connection(Role::Client, addr, alpn, local_cid_len)
    }

    /// Builds the server-side counterpart once a new connection's Initial
    /// packet has been routed here (the accept path is driven by
    /// `qd-runtime`'s dispatcher, outside this handle).
    pub fn accept(&mut self, addr: SocketAddr, alpn: &str, local_cid_len: usize) -> Connection {
        self.new_connection(Role::Server, addr, alpn, local_cid_len)
    }

    fn new_connection(&mut self, role: Role, addr: SocketAddr, alpn: &str, local_cid_len: usize) -> Connection {
        let tp = self.config.transport_parameters();
        let cc = build_congestion_controller(&self.config);
        let core = CoreConnection::with_congestion_controller(role, local_cid_len, tp, ConnPath::new_active(addr), cc);
        let (encoder, decoder) = build_qpack_pair(&self.config);
        let connection_id = self.next_connection_id();
        let trace = self.qlog_writer.as_ref().map(|writer| {
            Trace::new(
                connection_id.clone(),
                self.vantage_point(),
                CommonFields::quic(),
                QlogConfig {
                    enabled: true,
                    ..QlogConfig::default()
                },
                writer.clone(),
            )
        });

        Connection {
            core,
            connection_id,
            alpn: alpn.to_string(),
            control_reader: ControlStreamReader::new(),
            encoder,
            decoder,
            streams: Vec::new(),
            trace,
        }
    }
}

/// One accepted or emitted HTTP/3 message event, surfaced alongside its
/// stream id so the caller can route it to the right request/response.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub stream_id: u64,
    pub event: MessageEvent,
}

/// `Connection` handle: `open_stream`, `write`, `read`, `reset`,
/// `stop_sending` map directly onto the core state machine;
/// `request`/`on_request` additionally assemble HTTP/3 framing through
/// `qd-h3` and `qd-qpack`.
pub struct Connection {
    core: CoreConnection,
    connection_id: String,
    alpn: String,
    control_reader: ControlStreamReader,
    encoder: Encoder,
    decoder: Decoder,
    streams: Vec<(u64, MessageAssembler)>,
    trace: Option<Trace>,
}

impl Connection {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn alpn(&self) -> &str {
        &self.alpn
    }

    pub fn on_handshake_done(&mut self, peer_params: TransportParameters) {
        self.core.on_handshake_confirmed(peer_params);
    }

    /// `close(code, reason)`.
    pub fn close(&mut self, code: u64, reason: String) {
        self.core.close(code, reason);
    }

    /// Drains state-machine actions and reports whether the connection has
    /// since closed — the facade's counterpart to `on_connection_closed`.
    pub fn poll_closed(&mut self) -> Option<String> {
        self.core.take_actions().into_iter().find_map(|action| match action {
            Action::ConnectionClosed { reason } => Some(reason),
            _ => None,
        })
    }

    /// `open_stream(kind) -> id`.
    pub fn open_stream(&mut self, kind: StreamKind) -> Option<u64> {
        let id = self.core.application_open_stream(kind)?;
        // This side initiated the stream, so it will receive the other
        // party's message: a response if it dialed as a request stream.
        let expects_request = self.core.role == qd_conn::connection::Role::Server;
        self.streams.push((id, MessageAssembler::new(id, expects_request)));
        Some(id)
    }

    /// `write(id, bytes, fin)`.
    pub fn write(&mut self, stream_id: u64, bytes: Bytes, fin: bool) {
        self.core.application_write(stream_id, bytes, fin);
    }

    /// `read(id) -> bytes`.
    pub fn read(&mut self, stream_id: u64, max_len: usize) -> Option<Bytes> {
        self.core.stream_read(stream_id, max_len)
    }

    /// `reset(id, code)`.
    pub fn reset(&mut self, stream_id: u64, code: u64) {
        self.core.reset_stream(stream_id, code);
    }

    /// `stop_sending(id, code)`.
    pub fn stop_sending(&mut self, stream_id: u64, code: u64) -> qd_base::frame::Frame {
        self.core.stop_sending(stream_id, code)
    }

    /// `on_readable(id)` / `on_writable(id)`: surfaces every action the
    /// core produced since the last poll, for the caller to dispatch.
    pub fn poll_stream_events(&mut self) -> Vec<Action> {
        self.core.take_actions()
    }

    /// `request(method, scheme, authority, path, headers, body, on_response)`:
    /// opens a client-initiated bidirectional stream, encodes the field
    /// section through QPACK, and writes the HEADERS (and optional DATA)
    /// frame. Returns the stream id the caller polls via
    /// [`Connection::receive_h3`] for the response.
    pub fn request(
        &mut self,
        method: &str,
        scheme: &str,
        authority: &str,
        path: &str,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<u64, RequestError> {
        let stream_id = self
            .open_stream(StreamKind::ClientBidi)
            .ok_or(RequestError::NoStreamCredit)?;
        let fields = build_request_fields(method, scheme, authority, path, headers);
        let (encoder_stream_bytes, headers_frame) = encode_headers_frame(&mut self.encoder, stream_id, &fields)?;
        let mut out = headers_frame;
        if let Some(body) = body {
            out.extend(encode_data_frame(body));
        }
        self.core.application_write(stream_id, Bytes::from(encoder_stream_bytes), false);
        self.core.application_write(stream_id, Bytes::from(out), true);
        Ok(stream_id)
    }

    /// Builds and queues an HTTP/3 response's HEADERS (+ optional DATA)
    /// frame for `stream_id` — the server-side counterpart `on_request`'s
    /// `respond` callback would invoke.
    pub fn respond(
        &mut self,
        stream_id: u64,
        status: u16,
        headers: &[(String, String)],
        body: Option<Bytes>,
        fin: bool,
    ) -> Result<(), RequestError> {
        let fields = build_response_fields(status, headers);
        let (encoder_stream_bytes, headers_frame) = encode_headers_frame(&mut self.encoder, stream_id, &fields)?;
        let mut out = headers_frame;
        if let Some(body) = body {
            out.extend(encode_data_frame(body));
        }
        self.core.application_write(stream_id, Bytes::from(encoder_stream_bytes), false);
        self.core.application_write(stream_id, Bytes::from(out), fin);
        Ok(())
    }

    /// Feeds newly received bytes for a request/response stream through its
    /// [`MessageAssembler`], returning every HTTP/3 event now ready. Bytes
    /// that decode to a QPACK-blocked header section yield nothing here;
    /// call [`Connection::drain_qpack_encoder_stream`] once the matching
    /// encoder-stream instructions have arrived. `stream_id` must already
    /// be known to this handle (via [`Connection::open_stream`] or the
    /// peer-initiated counterpart the dispatcher registers on arrival).
    pub fn receive_h3(&mut self, stream_id: u64, bytes: &[u8]) -> Result<Vec<StreamMessage>, RequestError> {
        let assembler = self
            .streams
            .iter_mut()
            .find(|(id, _)| *id == stream_id)
            .map(|(_, a)| a)
            .ok_or(RequestError::NoStreamCredit)?;
        let events = assembler.receive(bytes, &mut self.decoder)?;
        Ok(events
            .into_iter()
            .map(|event| StreamMessage { stream_id, event })
            .collect())
    }

    /// Registers a peer-initiated request stream so subsequent
    /// [`Connection::receive_h3`] calls for it can be assembled.
    pub fn register_peer_stream(&mut self, stream_id: u64) {
        let expects_request = self.core.role == qd_conn::connection::Role::Server;
        self.streams.push((stream_id, MessageAssembler::new(stream_id, expects_request)));
    }

    /// Feeds newly received bytes off the connection's control stream,
    /// returning every complete HTTP/3 control frame (SETTINGS, GOAWAY, ...).
    pub fn receive_control(&mut self, bytes: &[u8]) -> Result<Vec<H3Frame>, RequestError> {
        Ok(self.control_reader.receive(bytes)?)
    }

    /// Applies bytes received on the QPACK encoder stream, then re-polls
    /// every stream the decoder had previously blocked on, returning any
    /// field sections that are now ready.
    pub fn drain_qpack_encoder_stream(&mut self, bytes: &[u8]) -> Result<Vec<StreamMessage>, RequestError> {
        let ready = self.decoder.apply_encoder_instructions(bytes)?;
        let mut out = Vec::new();
        for (stream_id, fields) in ready {
            if let Some((_, assembler)) = self.streams.iter_mut().find(|(id, _)| *id == stream_id) {
                let event = assembler.on_qpack_ready(fields)?;
                out.push(StreamMessage { stream_id, event });
            }
        }
        Ok(out)
    }

    pub fn flush_qlog(&self) {
        if let Some(trace) = &self.trace {
            trace.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    #[test]
    fn dial_produces_a_connection_with_a_stable_alpn_and_id() {
        let mut endpoint = Endpoint::new(Config::default(), Role::Client).unwrap();
        let conn = endpoint.dial(addr(), "h3", 8);
        assert_eq!(conn.alpn(), "h3");
        assert_eq!(conn.connection_id(), "0000000000000000");

        let second = endpoint.dial(addr(), "h3", 8);
        assert_eq!(second.connection_id(), "0000000000000001");
    }

    #[test]
    fn open_stream_respects_peer_stream_credit() {
        let mut endpoint = Endpoint::new(Config::default(), Role::Client).unwrap();
        let mut conn = endpoint.dial(addr(), "h3", 8);
        // No handshake confirmed yet, so peer_max_streams_bidi is still 0.
        assert_eq!(conn.open_stream(StreamKind::ClientBidi), None);

        let mut params = Config::default().transport_parameters();
        params.initial_max_streams_bidi = 4;
        params.initial_max_data = 1_000_000;
        conn.on_handshake_done(params);
        assert_eq!(conn.open_stream(StreamKind::ClientBidi), Some(0));
    }

    #[test]
    fn dispatcher_is_sized_from_worker_count() {
        let mut config = Config::default();
        config.worker_count = 3;
        let endpoint = Endpoint::new(config, Role::Server).unwrap();
        assert_eq!(endpoint.new_dispatcher().worker_count(), 3);
    }

    #[test]
    fn upgrade_listener_binds_on_an_ephemeral_port() {
        let endpoint = Endpoint::new(Config::default(), Role::Server).unwrap();
        let ephemeral: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = endpoint
            .bind_upgrade_listener(ephemeral, qd_upgrade::ListenerKind::Http, mio::Token(0))
            .unwrap();
        assert_eq!(listener.kind(), qd_upgrade::ListenerKind::Http);
    }

    #[test]
    fn request_without_stream_credit_is_rejected() {
        let mut endpoint = Endpoint::new(Config::default(), Role::Client).unwrap();
        let mut conn = endpoint.dial(addr(), "h3", 8);
        let err = conn
            .request("GET", "https", "example.com", "/", &[], None)
            .unwrap_err();
        assert!(matches!(err, RequestError::NoStreamCredit));
    }
}
