//! CID-to-worker routing table and round-robin allocation: an atomic
//! round-robin index, a CID-hash to worker map, and the invariant that the
//! map is mutated by exactly one thread so no lock is needed.

use fnv::FnvHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type WorkerId = usize;

/// Events a worker reports back to the dispatcher's single-writer thread.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    AddCid { cid: Vec<u8>, worker: WorkerId },
    RemoveCid { cid: Vec<u8> },
    ConnectionClosed { cid: Vec<u8> },
}

#[derive(Debug)]
pub enum Route {
    Existing(WorkerId),
    NewConnection(WorkerId),
    Drop,
}

/// Owned exclusively by the I/O thread. `register_worker`/workers never
/// touch `table` directly -- they only ever send `DispatchEvent`s, which
/// `drain_events` applies between receive iterations.
pub struct Dispatcher {
    table: FnvHashMap<Vec<u8>, WorkerId>,
    worker_count: usize,
    next_worker: AtomicUsize,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "dispatcher needs at least one worker");
        Dispatcher {
            table: FnvHashMap::default(),
            worker_count,
            next_worker: AtomicUsize::new(0),
        }
    }

    fn allocate_worker(&self) -> WorkerId {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_count
    }

    /// Routes one inbound datagram's destination CID. `is_client_initial`
    /// distinguishes a miss that should spin up a new connection from one
    /// that should be dropped (or answered with a stateless reset).
    pub fn route(&mut self, dcid: &[u8], is_client_initial: bool) -> Route {
        if let Some(&worker) = self.table.get(dcid) {
            return Route::Existing(worker);
        }
        if is_client_initial {
            let worker = self.allocate_worker();
            self.table.insert(dcid.to_vec(), worker);
            return Route::NewConnection(worker);
        }
        Route::Drop
    }

    /// Applies events a worker published since the last drain. Called by
    /// the I/O thread only, between receive iterations.
    pub fn drain_events(&mut self, events: impl IntoIterator<Item = DispatchEvent>) {
        for event in events {
            match event {
                DispatchEvent::AddCid { cid, worker } => {
                    self.table.insert(cid, worker);
                }
                DispatchEvent::RemoveCid { cid } | DispatchEvent::ConnectionClosed { cid } => {
                    self.table.remove(&cid);
                }
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn active_cid_count(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_initial_allocates_round_robin() {
        let mut d = Dispatcher::new(3);
        let r0 = d.route(b"cid-a", true);
        let r1 = d.route(b"cid-b", true);
        let r2 = d.route(b"cid-c", true);
        let r3 = d.route(b"cid-d", true);
        let ids: Vec<WorkerId> = [r0, r1, r2, r3]
            .into_iter()
            .map(|r| match r {
                Route::NewConnection(w) => w,
                _ => panic!("expected new connection"),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 0]);
    }

    #[test]
    fn existing_cid_routes_to_its_worker() {
        let mut d = Dispatcher::new(2);
        d.route(b"cid-a", true);
        match d.route(b"cid-a", false) {
            Route::Existing(w) => assert_eq!(w, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_initial_miss_is_dropped() {
        let mut d = Dispatcher::new(2);
        assert!(matches!(d.route(b"unknown", false), Route::Drop));
    }

    #[test]
    fn drain_events_applies_worker_published_mutations() {
        let mut d = Dispatcher::new(2);
        d.drain_events([DispatchEvent::AddCid { cid: b"x".to_vec(), worker: 1 }]);
        match d.route(b"x", false) {
            Route::Existing(w) => assert_eq!(w, 1),
            other => panic!("unexpected {other:?}"),
        }
        d.drain_events([DispatchEvent::RemoveCid { cid: b"x".to_vec() }]);
        assert!(matches!(d.route(b"x", false), Route::Drop));
    }
}
