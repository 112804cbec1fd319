//! Thin persistence wrapper on `AgentRun` (§4.D).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use ov_domain::model::{AgentRun, RunStatus, RunTrigger};
use ov_domain::trace::TraceEvent;
use parking_lot::RwLock;
use uuid::Uuid;

const MAX_RUNS_IN_MEMORY: usize = 4096;

struct Inner {
    runs: VecDeque<AgentRun>,
    index: HashMap<Uuid, usize>,
    base_seq: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            runs: VecDeque::new(),
            index: HashMap::new(),
            base_seq: 0,
        }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get(&self, run_id: &Uuid) -> Option<&AgentRun> {
        let seq = *self.index.get(run_id)?;
        self.runs.get(self.deque_idx(seq))
    }

    fn get_mut(&mut self, run_id: &Uuid) -> Option<&mut AgentRun> {
        let seq = *self.index.get(run_id)?;
        let idx = self.deque_idx(seq);
        self.runs.get_mut(idx)
    }

    fn push_back(&mut self, run: AgentRun) {
        let seq = self.base_seq + self.runs.len();
        self.index.insert(run.id, seq);
        self.runs.push_back(run);
    }

    fn pop_front(&mut self) {
        if let Some(run) = self.runs.pop_front() {
            self.index.remove(&run.id);
            self.base_seq += 1;
        }
    }
}

pub struct RunRegistry {
    inner: RwLock<Inner>,
    log_path: PathBuf,
}

impl RunRegistry {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).ok();
        Self {
            inner: RwLock::new(Inner::new()),
            log_path: state_dir.join("runs.jsonl"),
        }
    }

    fn persist(&self, run: &AgentRun) {
        let Ok(json) = serde_json::to_string(run) else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
        {
            let _ = writeln!(file, "{json}");
        }
    }

    /// Create a new run adopting `run_id` if given (dispatcher-created),
    /// else mint a fresh one (§4.H step 2).
    pub fn create(
        &self,
        agent_id: Uuid,
        thread_id: Uuid,
        owner_id: Uuid,
        trigger: RunTrigger,
        run_id: Option<Uuid>,
    ) -> AgentRun {
        let mut run = AgentRun::new(agent_id, thread_id, owner_id, trigger);
        if let Some(id) = run_id {
            run.id = id;
        }
        self.persist(&run);

        let mut inner = self.inner.write();
        inner.push_back(run.clone());
        if inner.runs.len() > MAX_RUNS_IN_MEMORY {
            inner.pop_front();
        }
        run
    }

    pub fn get(&self, run_id: &Uuid) -> Option<AgentRun> {
        self.inner.read().get(run_id).cloned()
    }

    /// Ids of runs that reached a terminal status before `cutoff` — used by
    /// the `SupervisorSeq` sweep (§10.1) to decide which per-run counters
    /// are safe to forget.
    pub fn terminal_run_ids_finished_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Vec<Uuid> {
        self.inner
            .read()
            .runs
            .iter()
            .filter(|r| r.status.is_terminal() && r.finished_at.is_some_and(|t| t < cutoff))
            .map(|r| r.id)
            .collect()
    }

    /// Transition a run's status. Terminal statuses are sticky: once a run
    /// reaches SUCCESS/FAILED/DEFERRED/CANCELLED, further calls are no-ops
    /// that return the existing (unchanged) run (§4.D, §8.1 property 3).
    pub fn transition(
        &self,
        run_id: &Uuid,
        new_status: RunStatus,
        error: Option<String>,
    ) -> Option<AgentRun> {
        let mut inner = self.inner.write();
        let run = inner.get_mut(run_id)?;

        if run.status.is_terminal() {
            return Some(run.clone());
        }

        let from = run.status;
        run.status = new_status;
        if new_status.is_terminal() {
            run.finished_at = Some(chrono::Utc::now());
        }
        if error.is_some() {
            run.error = error;
        }
        let updated = run.clone();
        drop(inner);
        self.persist(&updated);
        TraceEvent::RunTransitioned {
            run_id: updated.id.to_string(),
            from: from.to_string(),
            to: updated.status.to_string(),
        }
        .emit();
        Some(updated)
    }
}
