//! Connection identifiers (RFC 9000 §5.1): opaque 0-20 byte strings, each
//! carrying a sequence number and optional stateless-reset token.

use rand::RngCore;
use std::fmt;

pub const MAX_CID_LEN: usize = 20;
pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: Vec<u8>,
}

impl ConnectionId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        assert!(bytes.len() <= MAX_CID_LEN, "connection ID exceeds 20 bytes");
        Self { bytes }
    }

    pub fn random(len: usize, rng: &mut (impl RngCore + ?Sized)) -> Self {
        assert!(len <= MAX_CID_LEN);
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid(")?;
        for b in &self.bytes {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

pub type StatelessResetToken = [u8; STATELESS_RESET_TOKEN_LEN];

/// One entry in either the local or peer CID set: a sequence number, the
/// CID itself, and the stateless reset token associated with it (servers
/// always issue one for local CIDs; peer-issued entries carry whatever the
/// peer sent in `NEW_CONNECTION_ID`).
#[derive(Debug, Clone)]
pub struct CidEntry {
    pub sequence: u64,
    pub cid: ConnectionId,
    pub reset_token: Option<StatelessResetToken>,
    pub retired: bool,
}

/// Tracks the set of CIDs in play for one direction (local or peer): at
/// most one entry per sequence number, retired sequence numbers are never
/// reused, and a `retire_prior_to` watermark governs which entries are
/// still usable.
#[derive(Debug, Default)]
pub struct CidSet {
    entries: Vec<CidEntry>,
    next_sequence: u64,
    retire_prior_to: u64,
}

impl CidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, cid: ConnectionId, reset_token: Option<StatelessResetToken>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(CidEntry {
            sequence,
            cid,
            reset_token,
            retired: false,
        });
        sequence
    }

    /// Records a CID at an issuer-chosen sequence number, as received in a
    /// `NEW_CONNECTION_ID` frame (RFC 9000 §19.15: the sequence number is
    /// assigned by whoever issues the CID, not by the set that stores it).
    /// Returns `false` if `sequence` is already below the retirement
    /// watermark or already present.
    pub fn insert_at_sequence(
        &mut self,
        sequence: u64,
        cid: ConnectionId,
        reset_token: Option<StatelessResetToken>,
    ) -> bool {
        if sequence < self.retire_prior_to || self.entries.iter().any(|e| e.sequence == sequence) {
            return false;
        }
        self.entries.push(CidEntry {
            sequence,
            cid,
            reset_token,
            retired: false,
        });
        true
    }

    pub fn active(&self) -> impl Iterator<Item = &CidEntry> {
        self.entries.iter().filter(|e| !e.retired)
    }

    pub fn find(&self, cid: &ConnectionId) -> Option<&CidEntry> {
        self.entries.iter().find(|e| &e.cid == cid && !e.retired)
    }

    pub fn find_by_reset_token(&self, token: &StatelessResetToken) -> Option<&CidEntry> {
        self.entries
            .iter()
            .find(|e| e.reset_token.as_ref() == Some(token))
    }

    /// Retires every entry with sequence < `retire_prior_to`, returning the
    /// sequence numbers retired so the caller can emit `RETIRE_CONNECTION_ID`
    /// frames for the peer's CIDs it previously held.
    pub fn retire_prior_to(&mut self, retire_prior_to: u64) -> Vec<u64> {
        if retire_prior_to <= self.retire_prior_to {
            return Vec::new();
        }
        self.retire_prior_to = retire_prior_to;
        let mut retired = Vec::new();
        for entry in self.entries.iter_mut() {
            if entry.sequence < retire_prior_to && !entry.retired {
                entry.retired = true;
                retired.push(entry.sequence);
            }
        }
        retired
    }

    pub fn retire(&mut self, sequence: u64) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sequence == sequence) {
            let was_active = !entry.retired;
            entry.retired = true;
            was_active
        } else {
            false
        }
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_never_repeat() {
        let mut set = CidSet::new();
        let a = set.issue(ConnectionId::new(vec![1, 2, 3]), None);
        let b = set.issue(ConnectionId::new(vec![4, 5, 6]), None);
        assert_ne!(a, b);
        assert_eq!(set.active_count(), 2);
    }

    #[test]
    fn retire_prior_to_is_monotonic_and_idempotent() {
        let mut set = CidSet::new();
        set.issue(ConnectionId::new(vec![0]), None);
        set.issue(ConnectionId::new(vec![1]), None);
        set.issue(ConnectionId::new(vec![2]), None);
        let retired = set.retire_prior_to(2);
        assert_eq!(retired, vec![0, 1]);
        assert_eq!(set.active_count(), 1);
        // a lower watermark is a no-op
        assert!(set.retire_prior_to(1).is_empty());
    }

    #[test]
    fn find_by_reset_token() {
        let mut set = CidSet::new();
        let token = [7u8; STATELESS_RESET_TOKEN_LEN];
        set.issue(ConnectionId::new(vec![9, 9]), Some(token));
        assert!(set.find_by_reset_token(&token).is_some());
        assert!(set.find_by_reset_token(&[0u8; STATELESS_RESET_TOKEN_LEN]).is_none());
    }
}
