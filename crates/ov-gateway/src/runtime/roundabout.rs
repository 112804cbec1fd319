//! Stuck-worker watchdog (§4.K "Roundabout").
//!
//! Subscribes to `worker_tool_*` and `worker_heartbeat` events for a
//! specific job and counts poll ticks without any progress event. Past the
//! threshold it only warns — per the resolved open question in
//! `DESIGN.md`, the Roundabout never forcibly cancels a worker.

use std::sync::atomic::{AtomicU32, Ordering};

use ov_domain::model::AgentRunEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

const PROGRESS_EVENT_TYPES: &[&str] = &[
    "worker_tool_started",
    "worker_tool_completed",
    "worker_tool_failed",
    "worker_heartbeat",
];

pub struct Roundabout {
    job_id: Uuid,
    run_id: Uuid,
    polls_without_progress: AtomicU32,
    threshold: u32,
}

impl Roundabout {
    pub fn new(job_id: Uuid, run_id: Uuid, timeout_secs: u64, tick_secs: u64) -> Self {
        let threshold = (timeout_secs / tick_secs.max(1)).max(1) as u32;
        Self {
            job_id,
            run_id,
            polls_without_progress: AtomicU32::new(0),
            threshold,
        }
    }

    fn is_progress_event(&self, event: &AgentRunEvent) -> bool {
        event.run_id == self.run_id
            && PROGRESS_EVENT_TYPES.contains(&event.event_type.as_str())
            && event
                .payload
                .get("job_id")
                .and_then(|v| v.as_str())
                .is_some_and(|id| id == self.job_id.to_string())
    }

    /// Run the watchdog loop until `shutdown` fires. Warn-only: never
    /// cancels the worker it is watching.
    pub async fn watch(
        &self,
        mut events: broadcast::Receiver<AgentRunEvent>,
        tick: std::time::Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(tick) => {
                    let count = self.polls_without_progress.fetch_add(1, Ordering::SeqCst) + 1;
                    if count > self.threshold {
                        tracing::warn!(
                            job_id = %self.job_id,
                            run_id = %self.run_id,
                            polls_without_progress = count,
                            "worker appears stuck (roundabout warn-only, no forced cancel)"
                        );
                    }
                }
                result = events.recv() => {
                    match result {
                        Ok(event) if self.is_progress_event(&event) => {
                            self.polls_without_progress.store(0, Ordering::SeqCst);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event(run_id: Uuid, job_id: Uuid, event_type: &str) -> AgentRunEvent {
        AgentRunEvent {
            id: 1,
            run_id,
            event_type: event_type.into(),
            payload: json!({ "job_id": job_id.to_string() }),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn threshold_derived_from_timeout_over_tick() {
        let watchdog = Roundabout::new(Uuid::new_v4(), Uuid::new_v4(), 60, 10);
        assert_eq!(watchdog.threshold, 6);
    }

    #[test]
    fn progress_event_must_match_run_and_job() {
        let run_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let watchdog = Roundabout::new(job_id, run_id, 60, 10);

        assert!(watchdog.is_progress_event(&sample_event(run_id, job_id, "worker_heartbeat")));
        assert!(!watchdog.is_progress_event(&sample_event(Uuid::new_v4(), job_id, "worker_heartbeat")));
        assert!(!watchdog.is_progress_event(&sample_event(run_id, Uuid::new_v4(), "worker_heartbeat")));
        assert!(!watchdog.is_progress_event(&sample_event(run_id, job_id, "supervisor_token")));
    }

    #[tokio::test]
    async fn progress_event_resets_counter() {
        let run_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let watchdog = Roundabout::new(job_id, run_id, 1, 1);
        watchdog.polls_without_progress.store(5, Ordering::SeqCst);

        assert!(watchdog.is_progress_event(&sample_event(run_id, job_id, "worker_tool_started")));
    }
}
