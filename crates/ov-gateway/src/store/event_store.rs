//! Durable per-run event log (§4.B).
//!
//! Every event is appended to a per-run JSONL file before it is handed to
//! the [`EventBus`](super::event_bus::EventBus) for live fan-out — a
//! subscriber can never observe an event that a concurrent replay query
//! would not also find on disk. IDs are assigned monotonically per
//! `run_id`, starting at 1, with no gaps (§3.1 invariant, §8.1 I-1).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use ov_domain::model::AgentRunEvent;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::event_bus::EventBus;

/// Cap on events kept in memory per run; older entries are still on disk
/// and served by [`EventStore::events_after`] via a file scan fallback.
const MAX_EVENTS_IN_MEMORY_PER_RUN: usize = 4096;

struct RunLog {
    events: VecDeque<AgentRunEvent>,
    next_id: u64,
}

impl RunLog {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
        }
    }

    fn earliest_in_memory_id(&self) -> Option<u64> {
        self.events.front().map(|e| e.id)
    }
}

pub struct EventStore {
    state_dir: PathBuf,
    logs: RwLock<HashMap<Uuid, RunLog>>,
    bus: EventBus,
}

impl EventStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(state_dir.join("runs")).ok();
        Self {
            state_dir,
            logs: RwLock::new(HashMap::new()),
            bus: EventBus::new(1024),
        }
    }

    fn run_log_path(&self, run_id: &Uuid) -> PathBuf {
        self.state_dir.join("runs").join(format!("{run_id}.jsonl"))
    }

    /// Append a new event to a run's durable log, then publish it live.
    /// Persistence happens first — a publish is never observed without a
    /// matching committed record (§4.B contract).
    pub fn append(
        &self,
        run_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> AgentRunEvent {
        let mut logs = self.logs.write();
        let log = logs.entry(run_id).or_insert_with(RunLog::new);

        let event = AgentRunEvent {
            id: log.next_id,
            run_id,
            event_type: event_type.into(),
            payload,
            created_at: chrono::Utc::now(),
        };
        log.next_id += 1;

        self.persist(run_id, &event);

        log.events.push_back(event.clone());
        if log.events.len() > MAX_EVENTS_IN_MEMORY_PER_RUN {
            log.events.pop_front();
        }
        drop(logs);

        self.bus.publish(event.clone());
        event
    }

    fn persist(&self, run_id: Uuid, event: &AgentRunEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            return;
        };
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_log_path(&run_id))
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    tracing::warn!(%run_id, error = %e, "failed to persist run event");
                }
            }
            Err(e) => tracing::warn!(%run_id, error = %e, "failed to open run event log"),
        }
    }

    /// Return every event for `run_id` with `id > after_id`, in order.
    /// Falls back to a file scan when the requested range has already
    /// scrolled out of the in-memory ring (§4.J replay semantics).
    pub fn events_after(&self, run_id: Uuid, after_id: u64) -> Vec<AgentRunEvent> {
        let logs = self.logs.read();
        let Some(log) = logs.get(&run_id) else {
            return Vec::new();
        };

        let needs_file_scan = matches!(
            log.earliest_in_memory_id(),
            Some(earliest) if earliest > after_id + 1
        );

        if needs_file_scan {
            drop(logs);
            return self.events_after_from_disk(run_id, after_id);
        }

        log.events
            .iter()
            .filter(|e| e.id > after_id)
            .cloned()
            .collect()
    }

    fn events_after_from_disk(&self, run_id: Uuid, after_id: u64) -> Vec<AgentRunEvent> {
        let Ok(content) = std::fs::read_to_string(self.run_log_path(&run_id)) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<AgentRunEvent>(line).ok())
            .filter(|e| e.id > after_id)
            .collect()
    }

    /// The highest event ID committed for a run, if any. Used to seed
    /// `Last-Event-ID` when a client connects for the first time.
    pub fn latest_id(&self, run_id: Uuid) -> Option<u64> {
        let logs = self.logs.read();
        logs.get(&run_id).and_then(|log| log.events.back().map(|e| e.id))
    }

    /// Subscribe to live events across all runs. Callers filter by
    /// `run_id` themselves (§4.C — the bus does not scope subscriptions).
    pub fn subscribe_live(&self) -> broadcast::Receiver<AgentRunEvent> {
        self.bus.subscribe()
    }

    /// Drop the in-memory ring for a run once it is terminal and has been
    /// quiescent past the SSE heartbeat window (§10.1 SupervisorSeq sweep
    /// extends to this log too — the JSONL file is untouched).
    pub fn evict_from_memory(&self, run_id: &Uuid) {
        self.logs.write().remove(run_id);
    }
}
