//! Idempotency cache for `POST /supervisor` (§4.H).
//!
//! Keyed by `(Idempotency-Key, owner_id)`. A hit within the TTL returns the
//! previously created run instead of starting a new one. Bounded at
//! `max_size`, evicted in insertion order (§10.4, §6.5).

use std::collections::{HashMap, VecDeque};

use ov_domain::model::AgentRun;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone)]
struct Entry {
    run: AgentRun,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<(String, Uuid), Entry>,
    insertion_order: VecDeque<(String, Uuid)>,
}

pub struct IdempotencyCache {
    ttl: std::time::Duration,
    max_size: usize,
    inner: Mutex<Inner>,
}

impl IdempotencyCache {
    pub fn new(ttl_secs: u64, max_size: usize) -> Self {
        Self {
            ttl: std::time::Duration::from_secs(ttl_secs),
            max_size,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Look up a cached run for `(key, owner_id)`, if present and not
    /// expired (stale entries are lazily dropped on lookup).
    pub fn get(&self, key: &str, owner_id: Uuid) -> Option<AgentRun> {
        let mut inner = self.inner.lock();
        let cache_key = (key.to_string(), owner_id);
        let entry = inner.entries.get(&cache_key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            inner.entries.remove(&cache_key);
            return None;
        }
        Some(entry.run.clone())
    }

    /// Record the run created for `(key, owner_id)`. Evicts the oldest
    /// entry by insertion order if the cache is at capacity.
    pub fn put(&self, key: &str, owner_id: Uuid, run: AgentRun) {
        if self.max_size == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let cache_key = (key.to_string(), owner_id);

        if !inner.entries.contains_key(&cache_key) {
            inner.insertion_order.push_back(cache_key.clone());
        }
        inner.entries.insert(
            cache_key,
            Entry {
                run,
                inserted_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.max_size {
            if let Some(oldest) = inner.insertion_order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Drop entries older than the TTL — periodic background maintenance
    /// (§10.1).
    pub fn evict_expired(&self) {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        inner.entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        inner
            .insertion_order
            .retain(|key| inner.entries.contains_key(key));
    }
}
