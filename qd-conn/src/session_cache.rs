//! Session ticket cache for TLS resumption and 0-RTT (SPEC_FULL.md §C;
//! grounded on `session_cache.{h,cpp}`'s LRU-with-disk-persistence design).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_der: Vec<u8>,
    pub issued_at_unix_secs: u64,
    pub lifetime_secs: u32,
    pub max_early_data: u32,
}

impl SessionInfo {
    fn remaining_lifetime(&self, now_unix_secs: u64) -> u32 {
        let expiry = self.issued_at_unix_secs + self.lifetime_secs as u64;
        expiry.saturating_sub(now_unix_secs) as u32
    }

    fn is_valid(&self, now_unix_secs: u64) -> bool {
        self.remaining_lifetime(now_unix_secs) > 0
    }

    fn usable_for_0rtt(&self, now_unix_secs: u64) -> bool {
        self.is_valid(now_unix_secs) && self.max_early_data > 0
    }
}

pub trait SessionCache: std::fmt::Debug + Send {
    fn store(&mut self, server_name: &str, info: SessionInfo);
    fn get(&mut self, server_name: &str) -> Option<SessionInfo>;
    fn has_valid_session_for_0rtt(&mut self, server_name: &str) -> bool;
    fn clear(&mut self);
}

/// In-memory LRU cache, optionally backed by per-server-name files under
/// `cache_dir` (one `SessionInfo` blob each, server name hashed to a safe
/// filename). Disk I/O is synchronous and meant to be called from a worker
/// thread only at connection setup/teardown, never on the hot path.
#[derive(Debug)]
pub struct LruSessionCache {
    entries: HashMap<String, SessionInfo>,
    lru_order: Vec<String>,
    max_entries: usize,
    cache_dir: Option<PathBuf>,
}

impl LruSessionCache {
    pub fn new(max_entries: usize, cache_dir: Option<PathBuf>) -> Self {
        LruSessionCache {
            entries: HashMap::new(),
            lru_order: Vec::new(),
            max_entries,
            cache_dir,
        }
    }

    fn now_unix_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn touch(&mut self, server_name: &str) {
        self.lru_order.retain(|n| n != server_name);
        self.lru_order.push(server_name.to_string());
    }

    fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.max_entries {
            if self.lru_order.is_empty() {
                break;
            }
            let oldest = self.lru_order.remove(0);
            self.entries.remove(&oldest);
            self.remove_file(&oldest);
        }
    }

    fn safe_filename(server_name: &str) -> String {
        server_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }

    fn file_path(&self, server_name: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(Self::safe_filename(server_name)))
    }

    fn remove_file(&self, server_name: &str) {
        if let Some(path) = self.file_path(server_name) {
            let _ = std::fs::remove_file(path);
        }
    }

    fn save_to_disk(&self, server_name: &str, info: &SessionInfo) {
        let Some(path) = self.file_path(server_name) else { return };
        let _ = Self::write_blob(&path, info);
    }

    fn write_blob(path: &Path, info: &SessionInfo) -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&info.issued_at_unix_secs.to_le_bytes())?;
        file.write_all(&info.lifetime_secs.to_le_bytes())?;
        file.write_all(&info.max_early_data.to_le_bytes())?;
        file.write_all(&(info.session_der.len() as u32).to_le_bytes())?;
        file.write_all(&info.session_der)?;
        Ok(())
    }
}

impl SessionCache for LruSessionCache {
    fn store(&mut self, server_name: &str, info: SessionInfo) {
        self.save_to_disk(server_name, &info);
        self.entries.insert(server_name.to_string(), info);
        self.touch(server_name);
        self.evict_if_over_capacity();
    }

    fn get(&mut self, server_name: &str) -> Option<SessionInfo> {
        let now = Self::now_unix_secs();
        let valid = self.entries.get(server_name).is_some_and(|e| e.is_valid(now));
        if !valid {
            self.entries.remove(server_name);
            return None;
        }
        self.touch(server_name);
        self.entries.get(server_name).cloned()
    }

    fn has_valid_session_for_0rtt(&mut self, server_name: &str) -> bool {
        let now = Self::now_unix_secs();
        self.entries
            .get(server_name)
            .is_some_and(|e| e.usable_for_0rtt(now))
    }

    fn clear(&mut self) {
        for name in self.entries.keys() {
            self.remove_file(name);
        }
        self.entries.clear();
        self.lru_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lifetime: u32, max_early_data: u32) -> SessionInfo {
        SessionInfo {
            session_der: vec![1, 2, 3],
            issued_at_unix_secs: LruSessionCache::now_unix_secs(),
            lifetime_secs: lifetime,
            max_early_data,
        }
    }

    #[test]
    fn stores_and_retrieves_valid_session() {
        let mut cache = LruSessionCache::new(4, None);
        cache.store("example.com", info(3600, 1024));
        assert!(cache.get("example.com").is_some());
        assert!(cache.has_valid_session_for_0rtt("example.com"));
    }

    #[test]
    fn expired_session_is_not_returned() {
        let mut cache = LruSessionCache::new(4, None);
        let mut expired = info(3600, 1024);
        expired.issued_at_unix_secs = 0;
        expired.lifetime_secs = 1;
        cache.store("example.com", expired);
        assert!(cache.get("example.com").is_none());
    }

    #[test]
    fn evicts_least_recently_used_entry_over_capacity() {
        let mut cache = LruSessionCache::new(2, None);
        cache.store("a.com", info(3600, 0));
        cache.store("b.com", info(3600, 0));
        cache.get("a.com");
        cache.store("c.com", info(3600, 0));
        assert!(cache.get("b.com").is_none());
        assert!(cache.get("a.com").is_some());
        assert!(cache.get("c.com").is_some());
    }

    #[test]
    fn zero_max_early_data_is_not_usable_for_0rtt() {
        let mut cache = LruSessionCache::new(4, None);
        cache.store("example.com", info(3600, 0));
        assert!(!cache.has_valid_session_for_0rtt("example.com"));
    }
}
