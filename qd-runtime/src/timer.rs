//! Monotonic min-time timer registry. Drives per-space
//! PTO, idle timeout, ack-delay coalescing, and path-validation timeouts.
//! Implemented as a flat min-heap keyed by deadline rather than a classic
//! hashed timing wheel: worker connection counts are small enough (one
//! worker hosts at most a few thousand connections) that heap operations
//! stay cheap, and a heap needs no bucket-width tuning.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    LossDetection,
    IdleTimeout,
    AckDelay,
    PathValidation,
    KeyDiscard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline_micros: u64,
    connection_id: u64,
    kind: TimerKind,
    generation: u64,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline_micros.cmp(&other.deadline_micros)
    }
}

/// One registration per `(connection_id, kind)`; re-arming bumps a
/// generation counter so a stale heap entry for a since-moved deadline is
/// recognized and discarded when popped.
#[derive(Debug, Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<Entry>>,
    current: std::collections::HashMap<(u64, TimerKind), (u64, u64)>, // -> (deadline, generation)
}

impl TimerWheel {
    pub fn arm(&mut self, connection_id: u64, kind: TimerKind, deadline_micros: u64) {
        let gen = self
            .current
            .get(&(connection_id, kind))
            .map(|(_, g)| g + 1)
            .unwrap_or(0);
        self.current.insert((connection_id, kind), (deadline_micros, gen));
        self.heap.push(Reverse(Entry {
            deadline_micros,
            connection_id,
            kind,
            generation: gen,
        }));
    }

    pub fn cancel(&mut self, connection_id: u64, kind: TimerKind) {
        self.current.remove(&(connection_id, kind));
    }

    pub fn cancel_connection(&mut self, connection_id: u64) {
        self.current.retain(|(cid, _), _| *cid != connection_id);
    }

    /// Minimum deadline across all live timers, for the worker to pass as
    /// the event driver's wait timeout.
    pub fn min_time(&self) -> Option<u64> {
        self.current.values().map(|(d, _)| *d).min()
    }

    /// Pops and returns every timer whose deadline is `<= now_micros` and
    /// is still current (not cancelled or superseded by a re-arm).
    pub fn fire_due(&mut self, now_micros: u64) -> Vec<(u64, TimerKind)> {
        let mut fired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline_micros > now_micros {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            match self.current.get(&(entry.connection_id, entry.kind)) {
                Some(&(deadline, generation))
                    if deadline == entry.deadline_micros && generation == entry.generation =>
                {
                    self.current.remove(&(entry.connection_id, entry.kind));
                    fired.push((entry.connection_id, entry.kind));
                }
                _ => {} // stale entry, superseded by a later arm() or cancel()
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_due_timers_in_deadline_order() {
        let mut wheel = TimerWheel::default();
        wheel.arm(1, TimerKind::LossDetection, 100);
        wheel.arm(2, TimerKind::IdleTimeout, 50);
        let fired = wheel.fire_due(60);
        assert_eq!(fired, vec![(2, TimerKind::IdleTimeout)]);
        let fired = wheel.fire_due(100);
        assert_eq!(fired, vec![(1, TimerKind::LossDetection)]);
    }

    #[test]
    fn rearming_supersedes_the_stale_heap_entry() {
        let mut wheel = TimerWheel::default();
        wheel.arm(1, TimerKind::AckDelay, 100);
        wheel.arm(1, TimerKind::AckDelay, 200);
        let fired = wheel.fire_due(100);
        assert!(fired.is_empty());
        let fired = wheel.fire_due(200);
        assert_eq!(fired, vec![(1, TimerKind::AckDelay)]);
    }

    #[test]
    fn cancel_connection_drops_all_its_timers() {
        let mut wheel = TimerWheel::default();
        wheel.arm(1, TimerKind::LossDetection, 10);
        wheel.arm(1, TimerKind::IdleTimeout, 20);
        wheel.cancel_connection(1);
        assert_eq!(wheel.min_time(), None);
        assert!(wheel.fire_due(1000).is_empty());
    }

    #[test]
    fn min_time_reflects_the_earliest_live_deadline() {
        let mut wheel = TimerWheel::default();
        wheel.arm(1, TimerKind::LossDetection, 500);
        wheel.arm(2, TimerKind::IdleTimeout, 300);
        assert_eq!(wheel.min_time(), Some(300));
    }
}
