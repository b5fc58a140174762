//! Zero-copy scatter/gather byte buffer with read and write cursors.
//!
//! `ByteChain` is the send/recv buffer backing every QUIC stream and the
//! crypto stream. Segments are `Bytes` so that a chunk handed to a
//! sent-packet record for possible retransmission shares storage with the
//! stream's send buffer instead of being copied.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// An ordered sequence of byte segments with a read cursor. Writes append a
/// new segment; reads consume from the front without shifting later
/// segments, so `write` is O(1) amortized and `read` is O(bytes read), never
/// O(bytes remaining).
#[derive(Debug, Default)]
pub struct ByteChain {
    segments: VecDeque<Bytes>,
    len: usize,
}

impl ByteChain {
    pub fn new() -> Self {
        Self {
            segments: VecDeque::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `src` as a new segment. Never copies existing bytes.
    pub fn write(&mut self, src: Bytes) {
        if src.is_empty() {
            return;
        }
        self.len += src.len();
        self.segments.push_back(src);
    }

    pub fn write_slice(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let mut buf = BytesMut::with_capacity(src.len());
        buf.extend_from_slice(src);
        self.write(buf.freeze());
    }

    /// Returns a contiguous view of up to `max` bytes from the front without
    /// consuming them. If the front segment is shorter than `max` this
    /// returns only that segment (callers that need a guaranteed-length
    /// contiguous view should coalesce first via `peek_exact`).
    pub fn peek_span(&self, max: usize) -> &[u8] {
        match self.segments.front() {
            Some(seg) => &seg[..seg.len().min(max)],
            None => &[],
        }
    }

    /// Advances the read cursor by `n` bytes, dropping fully-consumed
    /// segments and splitting the front segment if `n` lands inside it.
    pub fn commit(&mut self, mut n: usize) {
        assert!(n <= self.len, "commit() past the end of the chain");
        self.len -= n;
        while n > 0 {
            let front_len = self.segments.front().map(|s| s.len()).unwrap_or(0);
            if front_len == 0 {
                break;
            }
            if front_len <= n {
                n -= front_len;
                self.segments.pop_front();
            } else {
                let front = self.segments.front_mut().unwrap();
                *front = front.slice(n..);
                n = 0;
            }
        }
    }

    /// Consumes up to `n` bytes into a single contiguous `Bytes`, advancing
    /// the cursor. Copies only when the requested range spans more than one
    /// segment.
    pub fn read(&mut self, n: usize) -> Bytes {
        let n = n.min(self.len);
        if n == 0 {
            return Bytes::new();
        }
        if let Some(front) = self.segments.front() {
            if front.len() >= n {
                let taken = front.slice(0..n);
                self.commit(n);
                return taken;
            }
        }
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let front = self.segments.front_mut().expect("len tracked consistently");
            let take = front.len().min(remaining);
            out.extend_from_slice(&front[..take]);
            remaining -= take;
            if take == front.len() {
                self.segments.pop_front();
            } else {
                *front = front.slice(take..);
            }
        }
        self.len -= n;
        out.freeze()
    }

    /// Materializes the entire remaining chain into one contiguous `Bytes`
    /// without consuming it. Used by callers (e.g. QPACK) that need a single
    /// `Buf` to walk with bit-level cursors.
    pub fn to_contiguous(&self) -> Bytes {
        if self.segments.len() == 1 {
            return self.segments[0].clone();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out.freeze()
    }
}

impl Buf for ByteChain {
    fn remaining(&self) -> usize {
        self.len
    }

    fn chunk(&self) -> &[u8] {
        self.peek_span(usize::MAX)
    }

    fn advance(&mut self, cnt: usize) {
        self.commit(cnt)
    }
}
