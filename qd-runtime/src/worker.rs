//! Single-threaded per-worker event loop. Each connection is pinned to
//! exactly one worker for its lifetime; stream callbacks run on that
//! worker's thread and must not block it.

use crate::dispatcher::DispatchEvent;
use crate::timer::{TimerKind, TimerWheel};
use fnv::FnvHashMap;
use qd_conn::connection::{Action, Connection};
use slab::Slab;
use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

/// One inbound datagram routed to this worker by the dispatcher.
pub struct PacketTask {
    pub datagram: Vec<u8>,
    pub peer_addr: std::net::SocketAddr,
    pub arrival_time_micros: u64,
}

/// Local-only CID to connection map; never touched by any other thread.
pub struct Worker {
    id: usize,
    connections: FnvHashMap<Vec<u8>, Connection>,
    timers: TimerWheel,
    queue: Receiver<PacketTask>,
    pending_queue: VecDeque<PacketTask>,
    outbound_events: Vec<DispatchEvent>,
    /// Hands out the `u64` connection keys `TimerWheel` indexes timers by,
    /// reclaiming a slot's key once its connection is removed rather than
    /// growing without bound over a worker's lifetime.
    connection_slots: Slab<Vec<u8>>,
    connection_keys: FnvHashMap<Vec<u8>, u64>,
}

impl Worker {
    pub fn new(id: usize, queue: Receiver<PacketTask>) -> Self {
        Worker {
            id,
            connections: FnvHashMap::default(),
            timers: TimerWheel::default(),
            queue,
            pending_queue: VecDeque::new(),
            outbound_events: Vec::new(),
            connection_slots: Slab::new(),
            connection_keys: FnvHashMap::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the `u64` connection key timers are armed against.
    pub fn insert_connection(&mut self, cid: Vec<u8>, connection: Connection) -> u64 {
        let key = self.connection_slots.insert(cid.clone()) as u64;
        self.connection_keys.insert(cid.clone(), key);
        self.connections.insert(cid, connection);
        tracing::debug!(worker = self.id, key, "connection added to worker");
        key
    }

    pub fn remove_connection(&mut self, cid: &[u8]) {
        if let Some(key) = self.connection_keys.remove(cid) {
            self.timers.cancel_connection(key);
            self.connection_slots.remove(key as usize);
        }
        self.connections.remove(cid);
        self.outbound_events
            .push(DispatchEvent::RemoveCid { cid: cid.to_vec() });
    }

    /// Drains the packet-task queue placed there by the dispatcher thread
    /// into this worker's local pending list.
    pub fn drain_packet_queue(&mut self) {
        while let Ok(task) = self.queue.try_recv() {
            self.pending_queue.push_back(task);
        }
    }

    pub fn pending_packet_count(&self) -> usize {
        self.pending_queue.len()
    }

    /// Runs any timers due at `now_micros`, returning the actions each
    /// affected connection reported (currently only loss-detection arming
    /// is driven directly from here; PTO/idle handling dispatches into the
    /// owning connection by its key).
    pub fn run_timers(&mut self, now_micros: u64) -> Vec<(u64, TimerKind)> {
        self.timers.fire_due(now_micros)
    }

    pub fn arm_timer(&mut self, connection_key: u64, kind: TimerKind, deadline_micros: u64) {
        self.timers.arm(connection_key, kind, deadline_micros);
    }

    pub fn min_wait_micros(&self) -> Option<u64> {
        self.timers.min_time()
    }

    pub fn take_outbound_events(&mut self) -> Vec<DispatchEvent> {
        std::mem::take(&mut self.outbound_events)
    }

    pub fn connection_mut(&mut self, cid: &[u8]) -> Option<&mut Connection> {
        self.connections.get_mut(cid)
    }

    /// Pops actions from every connection that has pending ones, e.g. to
    /// surface to the application layer above the worker.
    pub fn drain_connection_actions(&mut self) -> Vec<(Vec<u8>, Action)> {
        let mut out = Vec::new();
        for (cid, conn) in self.connections.iter_mut() {
            for action in conn.take_actions() {
                out.push((cid.clone(), action));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qd_base::tparams::TransportParameters;
    use qd_conn::connection::Role;
    use qd_conn::path::Path;
    use std::sync::mpsc::channel;

    fn make_connection() -> Connection {
        Connection::new(
            Role::Server,
            8,
            TransportParameters::default(),
            Path::new_active("127.0.0.1:4433".parse().unwrap()),
        )
    }

    #[test]
    fn insert_and_remove_connection_updates_count_and_events() {
        let (_tx, rx) = channel();
        let mut worker = Worker::new(0, rx);
        worker.insert_connection(b"cid".to_vec(), make_connection());
        assert_eq!(worker.connection_count(), 1);
        worker.remove_connection(b"cid");
        assert_eq!(worker.connection_count(), 0);
        let events = worker.take_outbound_events();
        assert!(matches!(events.as_slice(), [DispatchEvent::RemoveCid { .. }]));
    }

    #[test]
    fn drain_packet_queue_moves_tasks_from_channel() {
        let (tx, rx) = channel();
        let mut worker = Worker::new(0, rx);
        tx.send(PacketTask {
            datagram: vec![1, 2, 3],
            peer_addr: "127.0.0.1:1".parse().unwrap(),
            arrival_time_micros: 0,
        })
        .unwrap();
        worker.drain_packet_queue();
        assert_eq!(worker.pending_packet_count(), 1);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let (_tx, rx) = channel();
        let mut worker = Worker::new(0, rx);
        worker.arm_timer(1, TimerKind::IdleTimeout, 100);
        assert_eq!(worker.min_wait_micros(), Some(100));
        let fired = worker.run_timers(100);
        assert_eq!(fired, vec![(1, TimerKind::IdleTimeout)]);
    }
}
