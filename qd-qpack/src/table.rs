//! Static table (RFC 9204 Appendix A) and the dynamic insertion table. The
//! dynamic table is a FIFO ring keyed by absolute insertion index, since
//! QPACK addresses entries by index arithmetic relative to a moving
//! insertion point (RFC 9204 §3.2).

use crate::error::{QpackError, QpackResult};
use std::collections::VecDeque;

/// RFC 9204 Appendix A, indices 0..=98.
pub const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html;charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    (
        "strict-transport-security",
        "max-age=31536000;includesubdomains",
    ),
    (
        "strict-transport-security",
        "max-age=31536000;includesubdomains;preload",
    ),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1;mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    (
        "content-security-policy",
        "script-src 'none';object-src 'none';base-uri 'none'",
    ),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

pub fn static_lookup(index: u64) -> QpackResult<(&'static str, &'static str)> {
    STATIC_TABLE
        .get(index as usize)
        .copied()
        .ok_or(QpackError::StaticIndexOutOfRange(index))
}

/// Exact match search preferring the smallest index. RFC 9204 doesn't
/// mandate an order among ties; the encoder always takes the first hit.
pub fn static_find_exact(name: &str, value: &str) -> Option<u64> {
    STATIC_TABLE
        .iter()
        .position(|&(n, v)| n == name && v == value)
        .map(|i| i as u64)
}

pub fn static_find_name(name: &str) -> Option<u64> {
    STATIC_TABLE
        .iter()
        .position(|&(n, _)| n == name)
        .map(|i| i as u64)
}

/// One dynamic-table entry. `size` is the RFC 9204 §3.2.1 accounting size:
/// `name.len + value.len + 32`.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
    size: usize,
    /// Number of still-unacknowledged header blocks referencing this entry.
    refs: u32,
}

fn entry_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + 32
}

/// FIFO ring addressed by absolute insertion index (0-based, monotonically
/// increasing for the table's lifetime). `entries[0]` is the oldest
/// non-evicted entry; its absolute index is `base_index`.
#[derive(Debug, Default)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    base_index: u64,
    capacity: usize,
    used: usize,
}

impl DynamicTable {
    pub fn new(capacity: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            base_index: 0,
            capacity,
            used: 0,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Absolute index the next inserted entry would receive.
    pub fn insert_count(&self) -> u64 {
        self.base_index + self.entries.len() as u64
    }

    /// Evicts entries from the front until `additional` bytes are free,
    /// refusing if any entry that would need evicting still has
    /// outstanding references (RFC 9204 §2.1.1).
    fn make_room(&mut self, additional: usize) -> QpackResult<()> {
        while self.used + additional > self.capacity {
            match self.entries.front() {
                Some(entry) if entry.refs > 0 => return Err(QpackError::EvictionBlocked),
                Some(entry) => {
                    self.used -= entry.size;
                    self.entries.pop_front();
                    self.base_index += 1;
                }
                None => return Err(QpackError::EntryTooLarge),
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, name: String, value: String) -> QpackResult<u64> {
        let size = entry_size(&name, &value);
        if size > self.capacity {
            return Err(QpackError::EntryTooLarge);
        }
        self.make_room(size)?;
        let index = self.insert_count();
        self.entries.push_back(Entry {
            name,
            value,
            size,
            refs: 0,
        });
        self.used += size;
        Ok(index)
    }

    fn slot(&self, absolute_index: u64) -> QpackResult<usize> {
        if absolute_index < self.base_index {
            return Err(QpackError::DynamicEntryEvicted);
        }
        let slot = (absolute_index - self.base_index) as usize;
        if slot >= self.entries.len() {
            return Err(QpackError::DynamicIndexOutOfRange(absolute_index));
        }
        Ok(slot)
    }

    pub fn get(&self, absolute_index: u64) -> QpackResult<(&str, &str)> {
        let slot = self.slot(absolute_index)?;
        let entry = &self.entries[slot];
        Ok((entry.name.as_str(), entry.value.as_str()))
    }

    pub fn find_exact(&self, name: &str, value: &str) -> Option<u64> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.value == value)
            .map(|slot| self.base_index + slot as u64)
    }

    pub fn find_name(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|slot| self.base_index + slot as u64)
    }

    pub fn add_ref(&mut self, absolute_index: u64) -> QpackResult<()> {
        let slot = self.slot(absolute_index)?;
        self.entries[slot].refs += 1;
        Ok(())
    }

    pub fn release_ref(&mut self, absolute_index: u64) {
        if let Ok(slot) = self.slot(absolute_index) {
            if self.entries[slot].refs > 0 {
                self.entries[slot].refs -= 1;
            }
        }
    }

    /// True if the entry is still live (not yet evicted). An entry can be
    /// referenced right up until it is evicted; callers check this before
    /// choosing a dynamic-table reference during encoding.
    pub fn is_live(&self, absolute_index: u64) -> bool {
        self.slot(absolute_index).is_ok()
    }
}
