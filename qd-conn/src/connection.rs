//! Connection finite-state machine (RFC 9000 §5). Owns CID sets, per-space
//! loss recovery, the congestion controller, pacing state, the stream
//! table, the current path, and transport parameters; drives the
//! send-assembly loop and dispatches inbound frames.
//!
//! The connection does not own a socket directly -- that belongs to the
//! worker that drives many connections over one event loop.

use bytes::{Bytes, BytesMut};
use qd_base::cid::ConnectionId;
use qd_base::error::TransportError;
use qd_base::frame::Frame;
use qd_base::space::PnSpace;
use qd_base::tparams::TransportParameters;
use qd_recovery::congestion::{CongestionController, NewReno};
use qd_recovery::loss::LossRecovery;
use qd_recovery::pacing::Pacer;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;

use crate::cidmgr::CidManager;
use crate::path::Path as ConnPath;
use crate::stream::{RecvStream, SendStream, StreamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    WaitInitial,
    Handshaking,
    Connected,
    Closing,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Output actions the worker must carry out after driving the connection.
#[derive(Debug, Clone)]
pub enum Action {
    SendDatagram { frames: Vec<Frame>, space: PnSpace },
    StreamReadable { stream_id: u64 },
    StreamWritable { stream_id: u64 },
    StreamReset { stream_id: u64, error_code: u64 },
    ConnectionClosed { reason: String },
}

struct Streams {
    send: HashMap<u64, SendStream>,
    recv: HashMap<u64, RecvStream>,
    next_local_bidi: u64,
    next_local_uni: u64,
    peer_max_streams_bidi: u64,
    peer_max_streams_uni: u64,
}

impl Streams {
    fn new() -> Self {
        Streams {
            send: HashMap::new(),
            recv: HashMap::new(),
            next_local_bidi: 0,
            next_local_uni: 0,
            peer_max_streams_bidi: 0,
            peer_max_streams_uni: 0,
        }
    }
}

pub struct Connection {
    pub role: Role,
    state: ConnectionState,
    cids: CidManager,
    path: ConnPath,
    params: TransportParameters,
    peer_params: Option<TransportParameters>,
    recovery: LossRecovery,
    cc: Box<dyn CongestionController>,
    pacer: Pacer,
    streams: Streams,
    local_max_data: u64,
    data_recvd: u64,
    peer_max_data: u64,
    data_sent: u64,
    close_reason: Option<(u64, String)>,
    time_of_last_ack_eliciting_recv_micros: Option<u64>,
    pending_actions: Vec<Action>,
    /// Control frames queued for the next `assemble_datagram` call:
    /// `RETIRE_CONNECTION_ID`, `NEW_CONNECTION_ID`, `PATH_RESPONSE`.
    control_frames: Vec<Frame>,
    rng: Box<dyn RngCore>,
}

impl Connection {
    pub fn new(role: Role, local_cid_len: usize, params: TransportParameters, path: ConnPath) -> Self {
        Self::with_congestion_controller(role, local_cid_len, params, path, Box::new(NewReno::default()))
    }

    /// Same as [`Connection::new`], but lets the caller pick the congestion
    /// controller rather than always defaulting to New Reno: alternative
    /// algorithms plug in behind the same `CongestionController` trait.
    pub fn with_congestion_controller(
        role: Role,
        local_cid_len: usize,
        params: TransportParameters,
        path: ConnPath,
        cc: Box<dyn CongestionController>,
    ) -> Self {
        Connection {
            state: ConnectionState::WaitInitial,
            cids: CidManager::new(local_cid_len, params.active_connection_id_limit),
            path,
            local_max_data: params.initial_max_data,
            peer_max_data: 0,
            params,
            peer_params: None,
            recovery: LossRecovery::default(),
            cc,
            pacer: Pacer::default(),
            streams: Streams::new(),
            data_recvd: 0,
            data_sent: 0,
            close_reason: None,
            time_of_last_ack_eliciting_recv_micros: None,
            pending_actions: Vec::new(),
            control_frames: Vec::new(),
            rng: Box::new(StdRng::from_entropy()),
            role,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn on_handshake_confirmed(&mut self, peer_params: TransportParameters) {
        self.peer_params = Some(peer_params.clone());
        self.peer_max_data = peer_params.initial_max_data;
        self.streams.peer_max_streams_bidi = peer_params.initial_max_streams_bidi;
        self.streams.peer_max_streams_uni = peer_params.initial_max_streams_uni;
        self.state = ConnectionState::Connected;
        tracing::debug!(role = ?self.role, "handshake confirmed");
        self.maintain_local_cids();
    }

    /// Issues local CIDs up to the negotiated `active_connection_id_limit`
    /// and queues a `NEW_CONNECTION_ID` frame for each (RFC 9000 §5.1.1).
    /// Called once the handshake confirms the limit and again whenever a
    /// local CID is retired, so the supply available to the peer stays
    /// topped up.
    pub fn maintain_local_cids(&mut self) {
        while let Some((sequence, cid, reset_token)) = self.cids.issue_local(self.rng.as_mut()) {
            self.control_frames.push(Frame::NewConnectionId {
                sequence,
                retire_prior_to: 0,
                cid: Bytes::copy_from_slice(cid.as_bytes()),
                reset_token,
            });
        }
    }

    pub fn application_open_stream(&mut self, kind: StreamKind) -> Option<u64> {
        if kind.is_client_initiated() != (self.role == Role::Client) {
            return None;
        }
        let n = if kind.is_bidi() {
            let n = self.streams.next_local_bidi;
            if n >= self.streams.peer_max_streams_bidi {
                return None;
            }
            self.streams.next_local_bidi += 1;
            n
        } else {
            let n = self.streams.next_local_uni;
            if n >= self.streams.peer_max_streams_uni {
                return None;
            }
            self.streams.next_local_uni += 1;
            n
        };
        let id = kind.nth_id(n);
        self.streams.send.insert(id, SendStream::new(self.peer_send_window_for(id)));
        if kind.is_bidi() {
            self.streams
                .recv
                .insert(id, RecvStream::new(self.params.initial_max_stream_data_bidi_local));
        }
        Some(id)
    }

    /// The peer's advertised initial `MAX_STREAM_DATA` window for a stream
    /// we may send on, per the transport parameter RFC 9000 §18.2 assigns
    /// to it: uni streams use the peer's `initial_max_stream_data_uni`;
    /// bidi streams use `bidi_remote` if we initiated the stream (the peer
    /// sees it as remote-initiated) or `bidi_local` if the peer did.
    fn peer_send_window_for(&self, stream_id: u64) -> u64 {
        let kind = StreamKind::from_id(stream_id);
        let peer = match &self.peer_params {
            Some(p) => p,
            None => return 0,
        };
        if !kind.is_bidi() {
            return peer.initial_max_stream_data_uni;
        }
        let locally_initiated = kind.is_client_initiated() == (self.role == Role::Client);
        if locally_initiated {
            peer.initial_max_stream_data_bidi_remote
        } else {
            peer.initial_max_stream_data_bidi_local
        }
    }

    pub fn application_write(&mut self, stream_id: u64, bytes: Bytes, fin: bool) {
        self.ensure_remote_stream(stream_id);
        if let Some(send) = self.streams.send.get_mut(&stream_id) {
            send.write(bytes, fin);
        }
    }

    /// RFC 9000 §3.2: receiving a reference to a stream id beyond the
    /// current limit implicitly creates all intervening streams of that
    /// kind.
    fn ensure_remote_stream(&mut self, stream_id: u64) {
        let kind = StreamKind::from_id(stream_id);
        if kind.is_client_initiated() == (self.role == Role::Client) {
            let window = self.peer_send_window_for(stream_id);
            self.streams.send.entry(stream_id).or_insert_with(|| SendStream::new(window));
            if kind.is_bidi() {
                self.streams
                    .recv
                    .entry(stream_id)
                    .or_insert_with(|| RecvStream::new(self.params.initial_max_stream_data_bidi_local));
            }
            return;
        }
        let n = stream_id / 4;
        for i in 0..=n {
            let id = kind.nth_id(i);
            self.streams
                .recv
                .entry(id)
                .or_insert_with(|| RecvStream::new(self.params.initial_max_stream_data_bidi_remote));
            if kind.is_bidi() {
                let window = self.peer_send_window_for(id);
                self.streams.send.entry(id).or_insert_with(|| SendStream::new(window));
            }
        }
    }

    pub fn stream_read(&mut self, stream_id: u64, max_len: usize) -> Option<Bytes> {
        self.streams.recv.get_mut(&stream_id)?.read(max_len)
    }

    pub fn reset_stream(&mut self, stream_id: u64, error_code: u64) {
        if let Some(send) = self.streams.send.get_mut(&stream_id) {
            send.reset(error_code);
        }
    }

    pub fn stop_sending(&mut self, stream_id: u64, error_code: u64) -> Frame {
        Frame::StopSending { stream_id, error_code }
    }

    pub fn close(&mut self, error_code: u64, reason: String) {
        if self.state == ConnectionState::Connected || self.state == ConnectionState::Handshaking {
            tracing::info!(error_code, %reason, "closing connection");
            self.close_reason = Some((error_code, reason));
            self.state = ConnectionState::Closing;
        }
    }

    /// A transport error detected while processing an inbound frame: per
    /// RFC 9000 §7 a protocol violation closes the connection outright
    /// rather than dropping the offending frame.
    fn close_with_transport_error(&mut self, err: TransportError, reason: &str) {
        tracing::warn!(code = err.code(), reason, "transport error, closing connection");
        self.close_reason = Some((err.code(), reason.to_string()));
        self.state = ConnectionState::Closing;
        self.pending_actions.push(Action::ConnectionClosed { reason: reason.to_string() });
    }

    /// Dispatches one inbound, already-decrypted frame. `now_micros`
    /// drives RTT/loss bookkeeping.
    pub fn on_frame(&mut self, space: PnSpace, frame: Frame, now_micros: u64) {
        self.time_of_last_ack_eliciting_recv_micros = Some(now_micros);
        match frame {
            Frame::Ack { largest_acked, ranges, ack_delay, .. } => {
                let exponent = self.peer_params.as_ref().map(|p| p.ack_delay_exponent).unwrap_or(3);
                let ack_delay_micros = ack_delay << exponent;
                for range in &ranges {
                    self.recovery.on_ack_range(
                        space,
                        range.smallest,
                        range.largest,
                        ack_delay_micros,
                        now_micros,
                        self.cc.as_mut(),
                    );
                }
                let _ = largest_acked;
                self.recovery.detect_lost(space, now_micros, self.cc.as_mut());
            }
            Frame::Stream { stream_id, offset, data, fin } => {
                self.ensure_remote_stream(stream_id);
                let len = data.len() as u64;
                if let Some(recv) = self.streams.recv.get_mut(&stream_id) {
                    match recv.insert(offset, data, fin) {
                        Ok(()) => {
                            self.pending_actions.push(Action::StreamReadable { stream_id });
                            self.data_recvd += len;
                        }
                        Err(err) => {
                            self.close_with_transport_error(err, "stream exceeded advertised flow control limit");
                        }
                    }
                }
            }
            Frame::ResetStream { stream_id, error_code, final_size } => {
                self.ensure_remote_stream(stream_id);
                if let Some(recv) = self.streams.recv.get_mut(&stream_id) {
                    recv.reset(error_code, final_size);
                    self.pending_actions.push(Action::StreamReset { stream_id, error_code });
                }
            }
            Frame::StopSending { stream_id, error_code } => {
                if let Some(send) = self.streams.send.get_mut(&stream_id) {
                    send.reset(error_code);
                }
            }
            Frame::MaxData { max } => {
                self.peer_max_data = self.peer_max_data.max(max);
            }
            Frame::MaxStreamData { stream_id, max } => {
                self.ensure_remote_stream(stream_id);
                if let Some(send) = self.streams.send.get_mut(&stream_id) {
                    send.set_peer_max_stream_data(max);
                }
            }
            Frame::MaxStreamsBidi { max } => {
                self.streams.peer_max_streams_bidi = self.streams.peer_max_streams_bidi.max(max);
            }
            Frame::MaxStreamsUni { max } => {
                self.streams.peer_max_streams_uni = self.streams.peer_max_streams_uni.max(max);
            }
            Frame::NewConnectionId { sequence, retire_prior_to, cid, reset_token } => {
                let retired = self.cids.on_new_connection_id(
                    sequence,
                    ConnectionId::new(cid.to_vec()),
                    reset_token,
                    retire_prior_to,
                );
                for sequence in retired {
                    self.control_frames.push(Frame::RetireConnectionId { sequence });
                }
            }
            Frame::RetireConnectionId { sequence } => {
                self.cids.on_retire_connection_id(sequence);
                self.maintain_local_cids();
            }
            Frame::PathChallenge { data } => {
                self.control_frames.push(Frame::PathResponse { data });
            }
            Frame::PathResponse { data } => {
                self.path.on_path_response(data);
            }
            Frame::ConnectionCloseTransport { reason, .. }
            | Frame::ConnectionCloseApplication { reason, .. } => {
                self.state = ConnectionState::Draining;
                self.pending_actions.push(Action::ConnectionClosed {
                    reason: String::from_utf8_lossy(&reason).into_owned(),
                });
            }
            Frame::Ping | Frame::Padding { .. } | Frame::NewToken { .. } | Frame::HandshakeDone => {}
            Frame::Crypto { .. } => {
                // forwarded to the TLS adapter by the caller before frame
                // dispatch reaches this match arm.
            }
            Frame::DataBlocked { .. }
            | Frame::StreamDataBlocked { .. }
            | Frame::StreamsBlockedBidi { .. }
            | Frame::StreamsBlockedUni { .. } => {}
        }
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Send-assembly loop: packs frames for one space in priority order up
    /// to `max_datagram_size`, subject to congestion and anti-amplification.
    /// Returns `None` if nothing is ready to send. Queued control frames
    /// (`NEW_CONNECTION_ID`, `RETIRE_CONNECTION_ID`, `PATH_RESPONSE`) go out
    /// ahead of stream data.
    pub fn assemble_datagram(&mut self, space: PnSpace, max_datagram_size: usize, now_micros: u64) -> Option<Vec<Frame>> {
        if !self.cc.can_send(0) {
            return None;
        }
        let amp_budget = self.path.amplification_budget();
        if amp_budget == 0 {
            return None;
        }
        let budget = (max_datagram_size as u64).min(amp_budget) as usize;
        let mut frames = Vec::new();
        let mut used = 0usize;

        while let Some(frame) = self.control_frames.first() {
            let mut scratch = BytesMut::new();
            frame.encode(&mut scratch);
            if used + scratch.len() > budget {
                break;
            }
            used += scratch.len();
            frames.push(self.control_frames.remove(0));
        }

        let stream_ids: Vec<u64> = self.streams.send.keys().copied().collect();
        for stream_id in stream_ids {
            if used >= budget {
                break;
            }
            let remaining = budget - used;
            let conn_window = self.peer_max_data.saturating_sub(self.data_sent) as usize;
            let stream_window = self
                .streams
                .send
                .get(&stream_id)
                .map(|send| send.send_window() as usize)
                .unwrap_or(0);
            let take = remaining.min(conn_window).min(stream_window).min(1200);
            if take == 0 {
                continue;
            }
            if let Some(send) = self.streams.send.get_mut(&stream_id) {
                if let Some((offset, data, fin)) = send.take_for_send(take) {
                    let len = data.len() as u64;
                    self.data_sent += len;
                    used += data.len() + 16;
                    frames.push(Frame::Stream { stream_id, offset, data, fin });
                }
            }
        }

        if frames.is_empty() {
            return None;
        }
        let size_sent = used as u64;
        self.cc.on_sent(size_sent);
        self.path.on_datagram_sent(size_sent);
        let _ = self.pacer.on_sent(size_sent, now_micros, self.recovery.rtt.smoothed_rtt_micros, self.cc.as_ref());
        Some(frames)
    }

    /// Idle timeout check: `max_idle_timeout` negotiated as the minimum of
    /// both peers' values.
    pub fn check_idle_timeout(&mut self, now_micros: u64, negotiated_max_idle_timeout_micros: u64) {
        if negotiated_max_idle_timeout_micros == 0 {
            return;
        }
        if let Some(last) = self.time_of_last_ack_eliciting_recv_micros {
            if now_micros.saturating_sub(last) >= negotiated_max_idle_timeout_micros {
                tracing::debug!(negotiated_max_idle_timeout_micros, "idle timeout elapsed");
                self.state = ConnectionState::Draining;
                self.pending_actions.push(Action::ConnectionClosed {
                    reason: "idle timeout".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    fn server() -> Connection {
        let mut params = TransportParameters::default();
        params.initial_max_data = 1_000_000;
        params.initial_max_streams_bidi = 10;
        params.active_connection_id_limit = 4;
        params.initial_max_stream_data_bidi_local = 1_000_000;
        params.initial_max_stream_data_bidi_remote = 1_000_000;
        params.initial_max_stream_data_uni = 1_000_000;
        let mut conn = Connection::new(Role::Server, 8, params.clone(), ConnPath::new_active(addr()));
        conn.on_handshake_confirmed(params);
        conn
    }

    #[test]
    fn remote_stream_reference_implicitly_opens_intervening_streams() {
        let mut conn = server();
        conn.on_frame(
            PnSpace::Application,
            Frame::Stream { stream_id: 0, offset: 0, data: Bytes::from_static(b"hi"), fin: false },
            0,
        );
        assert!(conn.streams.recv.contains_key(&0));
        conn.on_frame(
            PnSpace::Application,
            Frame::Stream { stream_id: 8, offset: 0, data: Bytes::from_static(b"hi"), fin: false },
            0,
        );
        assert!(conn.streams.recv.contains_key(&4));
        assert!(conn.streams.recv.contains_key(&8));
    }

    #[test]
    fn stream_read_surfaces_reassembled_bytes() {
        let mut conn = server();
        conn.on_frame(
            PnSpace::Application,
            Frame::Stream { stream_id: 0, offset: 0, data: Bytes::from_static(b"hello"), fin: true },
            0,
        );
        let out = conn.stream_read(0, 100).unwrap();
        assert_eq!(&out[..], b"hello");
    }

    #[test]
    fn connection_close_transitions_to_draining() {
        let mut conn = server();
        conn.on_frame(
            PnSpace::Application,
            Frame::ConnectionCloseTransport { error_code: 0, frame_type: 0, reason: Bytes::new() },
            0,
        );
        assert_eq!(conn.state(), ConnectionState::Draining);
        let actions = conn.take_actions();
        assert!(matches!(actions.last(), Some(Action::ConnectionClosed { .. })));
    }

    #[test]
    fn assemble_datagram_packs_available_stream_bytes() {
        let mut conn = server();
        let id = conn.application_open_stream(StreamKind::ServerBidi).unwrap();
        conn.application_write(id, Bytes::from_static(b"payload"), true);
        let frames = conn.assemble_datagram(PnSpace::Application, 1200, 0).unwrap();
        let stream_frames: Vec<&Frame> = frames.iter().filter(|f| matches!(f, Frame::Stream { .. })).collect();
        assert_eq!(stream_frames.len(), 1);
        match stream_frames[0] {
            Frame::Stream { data, fin, .. } => {
                assert_eq!(&data[..], b"payload");
                assert!(*fin);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn handshake_confirmed_issues_local_cids_up_to_active_limit() {
        let mut conn = server();
        let frames = conn.assemble_datagram(PnSpace::Application, 1200, 0).unwrap();
        let new_cid_frames = frames.iter().filter(|f| matches!(f, Frame::NewConnectionId { .. })).count();
        assert_eq!(new_cid_frames, 4);
    }

    #[test]
    fn max_stream_data_frame_raises_peer_send_window() {
        let mut params = TransportParameters::default();
        params.initial_max_data = 1_000_000;
        params.initial_max_streams_bidi = 10;
        params.active_connection_id_limit = 2;
        // leave initial_max_stream_data_bidi_remote at its zero default so
        // the opened stream starts with no send window at all.
        let mut conn = Connection::new(Role::Server, 8, params.clone(), ConnPath::new_active(addr()));
        conn.on_handshake_confirmed(params);
        let id = conn.application_open_stream(StreamKind::ServerBidi).unwrap();
        conn.application_write(id, Bytes::from_static(b"payload"), false);
        // drain the NEW_CONNECTION_ID frames the handshake queued so the
        // assertions below reflect only the stream's flow-control state.
        conn.assemble_datagram(PnSpace::Application, 1200, 0);
        let before = conn.assemble_datagram(PnSpace::Application, 1200, 0);
        let sent_stream_bytes = before
            .map(|frames| frames.into_iter().any(|f| matches!(f, Frame::Stream { .. })))
            .unwrap_or(false);
        assert!(!sent_stream_bytes);

        conn.on_frame(PnSpace::Application, Frame::MaxStreamData { stream_id: id, max: 1 }, 0);
        let frames = conn.assemble_datagram(PnSpace::Application, 1200, 0).unwrap();
        let stream_frame = frames.iter().find(|f| matches!(f, Frame::Stream { .. })).unwrap();
        match stream_frame {
            Frame::Stream { data, .. } => assert_eq!(&data[..], b"p"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn reset_stream_surfaces_peer_error_code_via_action() {
        let mut conn = server();
        conn.on_frame(
            PnSpace::Application,
            Frame::ResetStream { stream_id: 0, error_code: 42, final_size: 0 },
            0,
        );
        let actions = conn.take_actions();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StreamReset { stream_id: 0, error_code: 42 })));
    }

    #[test]
    fn stream_exceeding_flow_control_limit_closes_connection() {
        let mut conn = server();
        // the implicit recv window for a remote stream comes from our own
        // initial_max_stream_data_bidi_remote, set tiny here to trigger it.
        conn.params.initial_max_stream_data_bidi_remote = 4;
        conn.on_frame(
            PnSpace::Application,
            Frame::Stream { stream_id: 0, offset: 0, data: Bytes::from_static(b"toolong"), fin: false },
            0,
        );
        assert_eq!(conn.state(), ConnectionState::Closing);
        let actions = conn.take_actions();
        assert!(matches!(actions.last(), Some(Action::ConnectionClosed { .. })));
    }

    #[test]
    fn new_connection_id_retirement_is_queued_as_outgoing_frame() {
        let mut conn = server();
        conn.on_frame(
            PnSpace::Application,
            Frame::NewConnectionId {
                sequence: 0,
                retire_prior_to: 0,
                cid: Bytes::from_static(&[1; 8]),
                reset_token: [0; 16],
            },
            0,
        );
        conn.on_frame(
            PnSpace::Application,
            Frame::NewConnectionId {
                sequence: 1,
                retire_prior_to: 1,
                cid: Bytes::from_static(&[2; 8]),
                reset_token: [0; 16],
            },
            0,
        );
        let frames = conn.assemble_datagram(PnSpace::Application, 1200, 0).unwrap();
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::RetireConnectionId { sequence: 0 })));
    }

    #[test]
    fn path_challenge_queues_matching_path_response() {
        let mut conn = server();
        conn.on_frame(PnSpace::Application, Frame::PathChallenge { data: [9; 8] }, 0);
        let frames = conn.assemble_datagram(PnSpace::Application, 1200, 0).unwrap();
        assert!(frames.iter().any(|f| matches!(f, Frame::PathResponse { data } if *data == [9; 8])));
    }

    #[test]
    fn idle_timeout_transitions_to_draining() {
        let mut conn = server();
        conn.time_of_last_ack_eliciting_recv_micros = Some(0);
        conn.check_idle_timeout(30_000_000, 30_000_000);
        assert_eq!(conn.state(), ConnectionState::Draining);
    }
}
