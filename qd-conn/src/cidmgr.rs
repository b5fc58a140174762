//! Connection ID manager: issues local CIDs for the peer to address us by,
//! and tracks CIDs the peer has issued for us to address them by.

use qd_base::cid::{CidSet, ConnectionId, StatelessResetToken};
use rand::RngCore;

#[derive(Debug)]
pub struct CidManager {
    /// CIDs we issued; the peer places these in the packets it sends us.
    local: CidSet,
    /// CIDs the peer issued; we place these in the packets we send them.
    peer: CidSet,
    local_cid_len: usize,
    active_connection_id_limit: u64,
}

impl CidManager {
    pub fn new(local_cid_len: usize, active_connection_id_limit: u64) -> Self {
        CidManager {
            local: CidSet::new(),
            peer: CidSet::new(),
            local_cid_len,
            active_connection_id_limit,
        }
    }

    pub fn local_cid_len(&self) -> usize {
        self.local_cid_len
    }

    /// Issues a new local CID up to `active_connection_id_limit` total
    /// active entries. Returns `None` once the limit is reached.
    pub fn issue_local(&mut self, rng: &mut dyn RngCore) -> Option<(u64, ConnectionId, StatelessResetToken)> {
        if self.local.active_count() as u64 >= self.active_connection_id_limit {
            return None;
        }
        let cid = ConnectionId::random(self.local_cid_len, rng);
        let mut token = [0u8; 16];
        rng.fill_bytes(&mut token);
        let sequence = self.local.issue(cid.clone(), Some(token));
        Some((sequence, cid, token))
    }

    pub fn on_retire_connection_id(&mut self, sequence: u64) -> bool {
        self.local.retire(sequence)
    }

    /// A `NEW_CONNECTION_ID` frame from the peer. The sequence number is
    /// the peer's to assign (RFC 9000 §19.15) and is stored verbatim so a
    /// later `RETIRE_CONNECTION_ID` we send references the exact entry the
    /// peer gave us. `retire_prior_to` retires our outstanding peer-CIDs
    /// below that sequence; the returned sequence numbers are the ones the
    /// caller must turn into outgoing `RETIRE_CONNECTION_ID` frames.
    pub fn on_new_connection_id(
        &mut self,
        sequence: u64,
        cid: ConnectionId,
        reset_token: StatelessResetToken,
        retire_prior_to: u64,
    ) -> Vec<u64> {
        if self.peer.find(&cid).is_none() {
            self.peer.insert_at_sequence(sequence, cid, Some(reset_token));
        }
        self.peer.retire_prior_to(retire_prior_to)
    }

    pub fn peer_cid_for_sending(&self) -> Option<&ConnectionId> {
        self.peer.active().next().map(|e| &e.cid)
    }

    pub fn local_cid_active(&self, cid: &ConnectionId) -> bool {
        self.local.find(cid).is_some()
    }

    pub fn find_by_reset_token(&self, token: &StatelessResetToken) -> bool {
        self.local.find_by_reset_token(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn issue_local_stops_at_active_connection_id_limit() {
        let mut mgr = CidManager::new(8, 2);
        let mut rng = StepRng::new(0, 1);
        assert!(mgr.issue_local(&mut rng).is_some());
        assert!(mgr.issue_local(&mut rng).is_some());
        assert!(mgr.issue_local(&mut rng).is_none());
    }

    #[test]
    fn new_connection_id_retires_prior_sequences() {
        let mut mgr = CidManager::new(8, 4);
        mgr.on_new_connection_id(0, ConnectionId::new(vec![1; 8]), [0; 16], 0);
        mgr.on_new_connection_id(1, ConnectionId::new(vec![2; 8]), [0; 16], 0);
        let retired = mgr.on_new_connection_id(2, ConnectionId::new(vec![3; 8]), [0; 16], 2);
        assert_eq!(retired, vec![0, 1]);
    }

    #[test]
    fn new_connection_id_keeps_peer_chosen_sequence_out_of_order() {
        let mut mgr = CidManager::new(8, 4);
        mgr.on_new_connection_id(5, ConnectionId::new(vec![1; 8]), [0; 16], 0);
        mgr.on_new_connection_id(3, ConnectionId::new(vec![2; 8]), [0; 16], 0);
        // retiring everything below 5 must retire sequence 3, not whatever
        // position it was inserted at.
        let retired = mgr.on_new_connection_id(7, ConnectionId::new(vec![3; 8]), [0; 16], 5);
        assert_eq!(retired, vec![3]);
    }
}
