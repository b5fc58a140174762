//! Sent-packet bookkeeping: one record per packet that carried
//! ack-eliciting frames, kept until acked, declared lost, or its space is
//! discarded.

use qd_base::space::PnSpace;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub time_sent_micros: u64,
    pub size: u64,
    pub ack_eliciting: bool,
    pub in_flight: bool,
    /// Stream/control frames carried, for retransmission on loss. Kept
    /// abstract here; the connection layer owns the concrete frame list
    /// and only consults `ack_eliciting`/`in_flight`/`size` for recovery
    /// accounting.
    pub retransmittable: bool,
}

/// Per-space table of packets awaiting acknowledgment, keyed by packet
/// number. One instance per `PnSpace`.
#[derive(Debug, Default)]
pub struct SentPacketTable {
    packets: BTreeMap<u64, SentPacket>,
}

impl SentPacketTable {
    pub fn insert(&mut self, pn: u64, packet: SentPacket) {
        self.packets.insert(pn, packet);
    }

    pub fn get(&self, pn: u64) -> Option<&SentPacket> {
        self.packets.get(&pn)
    }

    pub fn remove(&mut self, pn: u64) -> Option<SentPacket> {
        self.packets.remove(&pn)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn oldest_time_sent(&self) -> Option<u64> {
        self.packets.values().map(|p| p.time_sent_micros).min()
    }

    /// All packet numbers strictly below `pn`, largest first. Used by
    /// packet-threshold loss detection.
    pub fn below(&self, pn: u64) -> impl Iterator<Item = (u64, &SentPacket)> {
        self.packets.range(..pn).rev().map(|(pn, p)| (*pn, p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &SentPacket)> {
        self.packets.iter().map(|(pn, p)| (*pn, p))
    }

    /// Drops all bookkeeping for this space, e.g. when Initial or
    /// Handshake keys are discarded.
    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

/// Owns one sent-packet table per packet-number space.
#[derive(Debug, Default)]
pub struct SentPacketSpaces {
    initial: SentPacketTable,
    handshake: SentPacketTable,
    application: SentPacketTable,
}

impl SentPacketSpaces {
    pub fn table(&self, space: PnSpace) -> &SentPacketTable {
        match space {
            PnSpace::Initial => &self.initial,
            PnSpace::Handshake => &self.handshake,
            PnSpace::Application => &self.application,
        }
    }

    pub fn table_mut(&mut self, space: PnSpace) -> &mut SentPacketTable {
        match space {
            PnSpace::Initial => &mut self.initial,
            PnSpace::Handshake => &mut self.handshake,
            PnSpace::Application => &mut self.application,
        }
    }

    pub fn discard(&mut self, space: PnSpace) {
        self.table_mut(space).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(size: u64) -> SentPacket {
        SentPacket {
            time_sent_micros: 0,
            size,
            ack_eliciting: true,
            in_flight: true,
            retransmittable: true,
        }
    }

    #[test]
    fn insert_and_remove_round_trips() {
        let mut table = SentPacketTable::default();
        table.insert(5, packet(100));
        assert_eq!(table.get(5).unwrap().size, 100);
        let removed = table.remove(5).unwrap();
        assert_eq!(removed.size, 100);
        assert!(table.is_empty());
    }

    #[test]
    fn discard_clears_only_its_own_space() {
        let mut spaces = SentPacketSpaces::default();
        spaces.table_mut(PnSpace::Initial).insert(0, packet(50));
        spaces.table_mut(PnSpace::Application).insert(0, packet(50));
        spaces.discard(PnSpace::Initial);
        assert!(spaces.table(PnSpace::Initial).is_empty());
        assert!(!spaces.table(PnSpace::Application).is_empty());
    }

    #[test]
    fn below_returns_descending_order() {
        let mut table = SentPacketTable::default();
        for pn in [1, 2, 3, 5] {
            table.insert(pn, packet(10));
        }
        let below: Vec<u64> = table.below(5).map(|(pn, _)| pn).collect();
        assert_eq!(below, vec![3, 2, 1]);
    }
}
