//! Per-stream send/recv state machines and flow control (RFC 9000 §2.2,
//! §4).

use bytes::Bytes;
use qd_base::buffer::ByteChain;
use qd_base::error::TransportError;
use std::collections::{BTreeMap, VecDeque};

/// `kind = id & 0x3`: bit 0 selects the initiator, bit 1 selects
/// directionality (RFC 9000 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    ClientBidi,
    ServerBidi,
    ClientUni,
    ServerUni,
}

impl StreamKind {
    pub fn from_id(id: u64) -> Self {
        match id & 0x3 {
            0x0 => StreamKind::ClientBidi,
            0x1 => StreamKind::ServerBidi,
            0x2 => StreamKind::ClientUni,
            _ => StreamKind::ServerUni,
        }
    }

    pub fn is_bidi(self) -> bool {
        matches!(self, StreamKind::ClientBidi | StreamKind::ServerBidi)
    }

    pub fn is_client_initiated(self) -> bool {
        matches!(self, StreamKind::ClientBidi | StreamKind::ClientUni)
    }

    fn tag(self) -> u64 {
        match self {
            StreamKind::ClientBidi => 0x0,
            StreamKind::ServerBidi => 0x1,
            StreamKind::ClientUni => 0x2,
            StreamKind::ServerUni => 0x3,
        }
    }

    /// The `n`th stream id of this kind, 0-indexed.
    pub fn nth_id(self, n: u64) -> u64 {
        n * 4 + self.tag()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Send,
    DataSent,
    DataRecvd,
    ResetSent,
    ResetRecvd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Recv,
    SizeKnown,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

/// Per-stream send buffer and state. Bytes already handed to the packet
/// layer are retained by the caller's sent-packet record (`ByteChain`
/// segments are reference-counted `Bytes`, so no copy is needed there); on
/// loss the caller hands the same `Bytes` back via [`SendStream::requeue`].
#[derive(Debug)]
pub struct SendStream {
    state: SendState,
    buffer: ByteChain,
    /// Absolute stream offset of the next unsent byte in `buffer`.
    next_offset: u64,
    fin_offset: Option<u64>,
    retransmit_queue: VecDeque<(u64, Bytes)>,
    reset_error: Option<u64>,
    /// The peer's most recently advertised `MAX_STREAM_DATA` limit: the
    /// highest absolute offset we may send on this stream.
    peer_max_stream_data: u64,
}

impl SendStream {
    pub fn new(peer_max_stream_data: u64) -> Self {
        SendStream {
            state: SendState::Ready,
            buffer: ByteChain::new(),
            next_offset: 0,
            fin_offset: None,
            retransmit_queue: VecDeque::new(),
            reset_error: None,
            peer_max_stream_data,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /// Applies a `MAX_STREAM_DATA` update from the peer. Values only ever
    /// move forward (RFC 9000 §4.1): a frame carrying a lower or
    /// already-seen limit is ignored rather than shrinking the window.
    pub fn set_peer_max_stream_data(&mut self, max: u64) {
        self.peer_max_stream_data = self.peer_max_stream_data.max(max);
    }

    /// Bytes we are still permitted to send at `next_offset`, per the
    /// peer's advertised stream-level window.
    pub fn send_window(&self) -> u64 {
        self.peer_max_stream_data.saturating_sub(self.next_offset)
    }

    pub fn write(&mut self, data: Bytes, fin: bool) {
        if self.state == SendState::ResetSent || self.state == SendState::ResetRecvd {
            return;
        }
        if self.state == SendState::Ready {
            self.state = SendState::Send;
        }
        self.buffer.write(data);
        if fin {
            self.fin_offset = Some(self.pending_end_offset());
        }
    }

    fn pending_end_offset(&self) -> u64 {
        self.next_offset + self.buffer.len() as u64
    }

    /// Bytes not yet sent at least once, plus anything queued for
    /// retransmission.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + self.retransmit_queue.iter().map(|(_, b)| b.len()).sum::<usize>()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SendState::DataRecvd | SendState::ResetRecvd)
    }

    /// Pulls up to `max_len` bytes to place in the next packet: retransmit
    /// queue first, then fresh bytes. Returns `(offset, data, fin)`. The
    /// caller is responsible for clamping `max_len` to the peer's
    /// advertised stream-level window ([`SendStream::send_window`]) and to
    /// any connection-level budget before calling this.
    pub fn take_for_send(&mut self, max_len: usize) -> Option<(u64, Bytes, bool)> {
        if let Some((offset, data)) = self.retransmit_queue.pop_front() {
            if data.len() <= max_len {
                let fin = self.fin_offset == Some(offset + data.len() as u64);
                return Some((offset, data, fin));
            }
            let tail = data.slice(max_len..);
            let head = data.slice(..max_len);
            self.retransmit_queue.push_front((offset + max_len as u64, tail));
            return Some((offset, head, false));
        }
        if self.buffer.is_empty() {
            if let Some(fin_offset) = self.fin_offset {
                if fin_offset == self.next_offset && self.state == SendState::Send {
                    self.state = SendState::DataSent;
                    return Some((fin_offset, Bytes::new(), true));
                }
            }
            return None;
        }
        let take = max_len.min(self.buffer.len());
        let offset = self.next_offset;
        let data = self.buffer.read(take);
        self.next_offset += data.len() as u64;
        let fin = self.buffer.is_empty() && self.fin_offset == Some(self.next_offset);
        if fin {
            self.state = SendState::DataSent;
        }
        Some((offset, data, fin))
    }

    /// The peer reported this range lost; queue it for resend ahead of
    /// fresh bytes.
    pub fn requeue(&mut self, offset: u64, data: Bytes) {
        self.retransmit_queue.push_back((offset, data));
    }

    pub fn on_all_acked(&mut self) {
        if self.state == SendState::DataSent {
            self.state = SendState::DataRecvd;
        }
    }

    pub fn reset(&mut self, error_code: u64) {
        self.reset_error = Some(error_code);
        self.state = SendState::ResetSent;
        self.buffer = ByteChain::new();
        self.retransmit_queue.clear();
    }

    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetRecvd;
        }
    }
}

/// Reassembles out-of-order `STREAM` frames into an in-order byte stream.
/// Out-of-order fragments are buffered in `pending` keyed by offset until
/// the gap before them is filled.
#[derive(Debug)]
pub struct RecvStream {
    state: RecvState,
    /// Offset of the next byte the application will read.
    read_offset: u64,
    /// Contiguous bytes from `read_offset` not yet delivered to the app.
    available: ByteChain,
    /// Out-of-order fragments keyed by starting offset.
    pending: BTreeMap<u64, Bytes>,
    final_size: Option<u64>,
    reset_error: Option<u64>,
    max_stream_data: u64,
    window: u64,
    last_advertised_limit: u64,
}

impl RecvStream {
    pub fn new(initial_window: u64) -> Self {
        RecvStream {
            state: RecvState::Recv,
            read_offset: 0,
            available: ByteChain::new(),
            pending: BTreeMap::new(),
            final_size: None,
            reset_error: None,
            max_stream_data: initial_window,
            window: initial_window,
            last_advertised_limit: initial_window,
        }
    }

    pub fn state(&self) -> RecvState {
        self.state
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    pub fn max_stream_data(&self) -> u64 {
        self.max_stream_data
    }

    /// Inserts a `STREAM` frame fragment. `fin` fixes `final_size` at
    /// `offset + data.len()` (RFC 9000 §4.5). Returns
    /// `Err(TransportError::FlowControlError)` without storing anything if
    /// the fragment's end offset exceeds `max_stream_data` (RFC 9000 §4.1):
    /// the caller must close the connection rather than buffer past the
    /// advertised limit.
    pub fn insert(&mut self, offset: u64, data: Bytes, fin: bool) -> Result<(), TransportError> {
        if self.state != RecvState::Recv && self.state != RecvState::SizeKnown {
            return Ok(());
        }
        let end = offset + data.len() as u64;
        if end > self.max_stream_data {
            return Err(TransportError::FlowControlError);
        }
        if fin {
            self.final_size = Some(end);
            self.state = RecvState::SizeKnown;
        }
        if end <= self.read_offset {
            return Ok(()); // fully duplicate
        }
        let (offset, data) = if offset < self.read_offset {
            let skip = (self.read_offset - offset) as usize;
            (self.read_offset, data.slice(skip..))
        } else {
            (offset, data)
        };
        if !data.is_empty() {
            self.pending.insert(offset, data);
        }
        self.drain_contiguous();
        if self.final_size == Some(self.read_offset) && self.available.is_empty() {
            self.state = RecvState::DataRecvd;
        }
        Ok(())
    }

    fn drain_contiguous(&mut self) {
        loop {
            let Some((&offset, _)) = self.pending.iter().next() else {
                break;
            };
            if offset > self.read_offset {
                break;
            }
            let data = self.pending.remove(&offset).unwrap();
            let skip = (self.read_offset - offset) as usize;
            let data = if skip > 0 { data.slice(skip..) } else { data };
            self.read_offset += data.len() as u64;
            self.available.write(data);
        }
    }

    /// Reads up to `max_len` contiguous bytes available to the application.
    /// Returns `None` once all available bytes are consumed and the stream
    /// has ended.
    pub fn read(&mut self, max_len: usize) -> Option<Bytes> {
        if self.available.is_empty() {
            if self.state == RecvState::DataRecvd {
                self.state = RecvState::DataRead;
            }
            return None;
        }
        Some(self.available.read(max_len))
    }

    pub fn reset(&mut self, error_code: u64, final_size: u64) {
        self.reset_error = Some(error_code);
        self.final_size = Some(final_size);
        self.state = RecvState::ResetRecvd;
        self.pending.clear();
        self.available = ByteChain::new();
    }

    /// Returns a new `MAX_STREAM_DATA` value if half the current window has
    /// been consumed by the application since the last advertisement. The
    /// threshold is measured against bytes the application has actually
    /// read, not bytes merely received and buffered.
    pub fn poll_flow_control_update(&mut self) -> Option<u64> {
        let consumed_since_advertised = self
            .read_offset
            .saturating_sub(self.last_advertised_limit.saturating_sub(self.window));
        if consumed_since_advertised >= self.window / 2 {
            self.max_stream_data = self.read_offset + self.window;
            self.last_advertised_limit = self.max_stream_data;
            return Some(self.max_stream_data);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_from_id_matches_rfc_bit_layout() {
        assert_eq!(StreamKind::from_id(0), StreamKind::ClientBidi);
        assert_eq!(StreamKind::from_id(1), StreamKind::ServerBidi);
        assert_eq!(StreamKind::from_id(2), StreamKind::ClientUni);
        assert_eq!(StreamKind::from_id(3), StreamKind::ServerUni);
        assert_eq!(StreamKind::ClientBidi.nth_id(5), 20);
    }

    #[test]
    fn send_stream_emits_bytes_then_fin() {
        let mut s = SendStream::new(1000);
        s.write(Bytes::from_static(b"hello"), true);
        let (offset, data, fin) = s.take_for_send(100).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(&data[..], b"hello");
        assert!(fin);
        assert_eq!(s.state(), SendState::DataSent);
    }

    #[test]
    fn send_stream_respects_max_len_and_requeues_on_loss() {
        let mut s = SendStream::new(1000);
        s.write(Bytes::from_static(b"abcdefgh"), false);
        let (offset, data, _) = s.take_for_send(4).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(&data[..], b"abcd");
        s.requeue(offset, data);
        let (offset2, data2, _) = s.take_for_send(100).unwrap();
        assert_eq!(offset2, 0);
        assert_eq!(&data2[..], b"abcd");
    }

    #[test]
    fn recv_stream_reorders_out_of_order_fragments() {
        let mut r = RecvStream::new(1000);
        r.insert(5, Bytes::from_static(b"world"), true).unwrap();
        assert!(r.read(100).is_none());
        r.insert(0, Bytes::from_static(b"hello"), false).unwrap();
        let out = r.read(100).unwrap();
        assert_eq!(&out[..], b"helloworld");
        assert_eq!(r.final_size(), Some(10));
    }

    #[test]
    fn recv_stream_drops_fully_duplicate_fragment() {
        let mut r = RecvStream::new(1000);
        r.insert(0, Bytes::from_static(b"abc"), false).unwrap();
        r.read(3);
        r.insert(0, Bytes::from_static(b"abc"), false).unwrap();
        assert!(r.read(10).is_none());
    }

    #[test]
    fn recv_stream_flow_control_fires_at_half_window() {
        let mut r = RecvStream::new(100);
        r.insert(0, Bytes::from(vec![0u8; 60]), false).unwrap();
        r.read(60);
        assert_eq!(r.poll_flow_control_update(), Some(160));
        assert_eq!(r.poll_flow_control_update(), None);
    }

    #[test]
    fn recv_stream_rejects_fragment_past_max_stream_data() {
        let mut r = RecvStream::new(10);
        assert_eq!(
            r.insert(5, Bytes::from_static(b"abcdef"), false),
            Err(TransportError::FlowControlError)
        );
    }

    #[test]
    fn send_stream_clamps_send_window_to_peer_max_stream_data() {
        let mut s = SendStream::new(4);
        s.write(Bytes::from_static(b"abcdefgh"), false);
        assert_eq!(s.send_window(), 4);
        let (offset, data, _) = s.take_for_send(s.send_window() as usize).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(&data[..], b"abcd");
        assert_eq!(s.send_window(), 0);
        s.set_peer_max_stream_data(8);
        assert_eq!(s.send_window(), 4);
        s.set_peer_max_stream_data(1); // lower values are ignored
        assert_eq!(s.send_window(), 4);
    }
}
