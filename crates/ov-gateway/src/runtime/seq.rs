//! `SupervisorSeq` (§3.1/§5, retired per the resolved open question in §9):
//! a process-local per-run counter that used to back a polling cursor for
//! legacy subscribers. The persistent event id on `/stream/runs/{run_id}`
//! is the only cursor exposed on the wire now; this map only tracks how
//! many events the legacy, no-replay `/supervisor/events` endpoint has
//! forwarded for a run, so the periodic sweep knows when a run's entry is
//! safe to drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct SupervisorSeqMap {
    counters: RwLock<HashMap<Uuid, Arc<AtomicU64>>>,
}

impl SupervisorSeqMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the counter for `run_id`, creating it on first use.
    pub fn increment(&self, run_id: Uuid) -> u64 {
        if let Some(counter) = self.counters.read().get(&run_id) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }

        let counter = self
            .counters
            .write()
            .entry(run_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self, run_id: &Uuid) -> u64 {
        self.counters
            .read()
            .get(run_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Drop the counter entries in `terminal_run_ids`. The caller decides
    /// which runs have been terminal long enough to be safe to forget
    /// (§10.1, "sweep... clears per-run sequence counters for runs that
    /// have been terminal for longer than the SSE heartbeat interval").
    pub fn sweep(&self, terminal_run_ids: &[Uuid]) -> usize {
        let mut counters = self.counters.write();
        let before = counters.len();
        for run_id in terminal_run_ids {
            counters.remove(run_id);
        }
        before - counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_is_per_run() {
        let map = SupervisorSeqMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(map.increment(a), 1);
        assert_eq!(map.increment(a), 2);
        assert_eq!(map.increment(b), 1);

        assert_eq!(map.get(&a), 2);
        assert_eq!(map.get(&b), 1);
    }

    #[test]
    fn sweep_removes_only_named_runs() {
        let map = SupervisorSeqMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        map.increment(a);
        map.increment(b);

        let removed = map.sweep(&[a]);

        assert_eq!(removed, 1);
        assert_eq!(map.get(&a), 0);
        assert_eq!(map.get(&b), 1);
        assert_eq!(map.len(), 1);
    }
}
