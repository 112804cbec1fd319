//! Durable FIFO of worker jobs with at-most-once completion (§4.E).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use ov_domain::model::{JobStatus, WorkerJob};
use parking_lot::RwLock;
use uuid::Uuid;

const MAX_JOBS_IN_MEMORY: usize = 4096;

struct Inner {
    jobs: VecDeque<WorkerJob>,
    index: HashMap<Uuid, usize>,
    base_seq: usize,
    /// runner_id -> job_id currently executing there (§4.F per-runner concurrency).
    active_by_runner: HashMap<String, Uuid>,
}

impl Inner {
    fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
            index: HashMap::new(),
            base_seq: 0,
            active_by_runner: HashMap::new(),
        }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get_mut(&mut self, job_id: &Uuid) -> Option<&mut WorkerJob> {
        let seq = *self.index.get(job_id)?;
        let idx = self.deque_idx(seq);
        self.jobs.get_mut(idx)
    }

    fn push_back(&mut self, job: WorkerJob) {
        let seq = self.base_seq + self.jobs.len();
        self.index.insert(job.id, seq);
        self.jobs.push_back(job);
    }

    fn pop_front(&mut self) {
        if let Some(job) = self.jobs.pop_front() {
            self.index.remove(&job.id);
            self.base_seq += 1;
        }
    }
}

pub struct WorkerQueue {
    inner: RwLock<Inner>,
    log_path: PathBuf,
}

impl WorkerQueue {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).ok();
        Self {
            inner: RwLock::new(Inner::new()),
            log_path: state_dir.join("worker_jobs.jsonl"),
        }
    }

    fn persist(&self, job: &WorkerJob) {
        let Ok(json) = serde_json::to_string(job) else {
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

    pub fn enqueue(
        &self,
        owner_id: Uuid,
        task: impl Into<String>,
        model: impl Into<String>,
        config: Option<serde_json::Value>,
        supervisor_run_id: Option<Uuid>,
    ) -> WorkerJob {
        let job = WorkerJob::new(owner_id, supervisor_run_id, task, model, config);
        self.persist(&job);

        let mut inner = self.inner.write();
        inner.push_back(job.clone());
        if inner.jobs.len() > MAX_JOBS_IN_MEMORY {
            inner.pop_front();
        }
        job
    }

    pub fn get(&self, job_id: &Uuid) -> Option<WorkerJob> {
        let inner = self.inner.read();
        let seq = *inner.index.get(job_id)?;
        inner.jobs.get(inner.deque_idx(seq)).cloned()
    }

    /// Select up to `limit` of the oldest `queued` jobs and transition them
    /// to `running` atomically (single writer lock held for the whole
    /// scan-and-flip, standing in for the spec's row-level `SELECT … FOR
    /// UPDATE`). Optionally restrict to jobs for a given tenant set of
    /// owners — the caller passes `None` in single-tenant mode.
    pub fn claim_batch(&self, limit: usize, owner_filter: Option<&[Uuid]>) -> Vec<WorkerJob> {
        let mut inner = self.inner.write();
        let candidates: Vec<Uuid> = inner
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .filter(|j| owner_filter.map_or(true, |owners| owners.contains(&j.owner_id)))
            .take(limit)
            .map(|j| j.id)
            .collect();

        let mut claimed = Vec::with_capacity(candidates.len());
        for job_id in candidates {
            if let Some(job) = inner.get_mut(&job_id) {
                job.status = JobStatus::Running;
                job.started_at = Some(chrono::Utc::now());
                claimed.push(job.clone());
            }
        }
        drop(inner);
        for job in &claimed {
            self.persist(job);
        }
        claimed
    }

    /// Terminal transition (§4.E invariant: error populated iff status is
    /// failed or timeout).
    pub fn complete(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        error: Option<String>,
        worker_id: Option<String>,
    ) -> Option<WorkerJob> {
        debug_assert!(status.is_terminal());
        let mut inner = self.inner.write();
        let job = inner.get_mut(job_id)?;
        job.status = status;
        job.finished_at = Some(chrono::Utc::now());
        job.error = if matches!(status, JobStatus::Failed | JobStatus::Timeout) {
            error
        } else {
            None
        };
        if worker_id.is_some() {
            job.worker_id = worker_id;
        }
        let updated = job.clone();
        drop(inner);
        self.persist(&updated);
        Some(updated)
    }

    /// True if `runner_id` has no job currently marked active against it.
    pub fn can_accept_for_runner(&self, runner_id: &str) -> bool {
        !self.inner.read().active_by_runner.contains_key(runner_id)
    }

    pub fn mark_active(&self, runner_id: impl Into<String>, job_id: Uuid) {
        self.inner.write().active_by_runner.insert(runner_id.into(), job_id);
    }

    pub fn clear_active(&self, runner_id: &str) {
        self.inner.write().active_by_runner.remove(runner_id);
    }

    /// All jobs stuck `running` past `deadline` — used by the stuck-job
    /// reaper (§10.1).
    pub fn running_started_before(&self, deadline: chrono::DateTime<chrono::Utc>) -> Vec<WorkerJob> {
        self.inner
            .read()
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .filter(|j| j.started_at.is_some_and(|started| started < deadline))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (WorkerQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (WorkerQueue::new(dir.path()), dir)
    }

    #[test]
    fn claim_batch_transitions_queued_to_running() {
        let (q, _dir) = queue();
        let owner = Uuid::new_v4();
        q.enqueue(owner, "task", "model", None, None);
        q.enqueue(owner, "task2", "model", None, None);

        let claimed = q.claim_batch(1, None);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert!(claimed[0].started_at.is_some());

        let remaining = q.claim_batch(10, None);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn complete_sets_error_only_for_failure_statuses() {
        let (q, _dir) = queue();
        let job = q.enqueue(Uuid::new_v4(), "task", "model", None, None);
        q.claim_batch(10, None);

        let done = q.complete(&job.id, JobStatus::Success, Some("ignored".into()), Some("w1".into())).unwrap();
        assert!(done.error.is_none());
        assert_eq!(done.worker_id.as_deref(), Some("w1"));
    }

    #[test]
    fn complete_with_failure_keeps_error() {
        let (q, _dir) = queue();
        let job = q.enqueue(Uuid::new_v4(), "task", "model", None, None);
        q.claim_batch(10, None);

        let done = q.complete(&job.id, JobStatus::Failed, Some("boom".into()), None).unwrap();
        assert_eq!(done.error.as_deref(), Some("boom"));
    }

    #[test]
    fn runner_slot_blocks_second_claim() {
        let (q, _dir) = queue();
        assert!(q.can_accept_for_runner("laptop-1"));
        q.mark_active("laptop-1", Uuid::new_v4());
        assert!(!q.can_accept_for_runner("laptop-1"));
        q.clear_active("laptop-1");
        assert!(q.can_accept_for_runner("laptop-1"));
    }

    #[test]
    fn running_started_before_finds_stuck_jobs() {
        let (q, _dir) = queue();
        let job = q.enqueue(Uuid::new_v4(), "task", "model", None, None);
        q.claim_batch(10, None);

        let future_deadline = chrono::Utc::now() + chrono::Duration::seconds(60);
        let stuck = q.running_started_before(future_deadline);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, job.id);

        let past_deadline = chrono::Utc::now() - chrono::Duration::seconds(60);
        assert!(q.running_started_before(past_deadline).is_empty());
    }
}
