//! Worker Dispatcher (§4.F) — the background loop that claims queued jobs
//! and runs them, one task per job, respecting per-runner concurrency.

use std::sync::Arc;
use std::time::Duration;

use ov_domain::model::JobStatus;
use ov_domain::trace::TraceEvent;
use serde_json::json;
use uuid::Uuid;

use crate::resume::ResumeController;
use crate::tenant::TenantRouter;
use crate::worker_runner::WorkerRunner;

/// Identifies this process to the per-runner active-job map (§4.F,
/// at-most-one-job-per-runner).
const RUNNER_ID: &str = "local";

pub struct WorkerDispatcher {
    router: Arc<TenantRouter>,
    runner: Arc<WorkerRunner>,
    resume: Arc<ResumeController>,
    tick: Duration,
    claim_batch: usize,
}

impl WorkerDispatcher {
    pub fn new(
        router: Arc<TenantRouter>,
        runner: Arc<WorkerRunner>,
        resume: Arc<ResumeController>,
        tick: Duration,
        claim_batch: usize,
    ) -> Self {
        Self {
            router,
            runner,
            resume,
            tick,
            claim_batch,
        }
    }

    /// Run the dispatch loop until `shutdown` fires. Each tick iterates
    /// every known tenant (single-tenant mode has exactly one) and claims
    /// up to `claim_batch` jobs per tenant, launching each on its own task.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = interval.tick() => self.tick_once(),
            }
        }
    }

    fn tick_once(&self) {
        let tenant_ids = if self.router.multi_tenant() {
            self.router.known_tenants()
        } else {
            vec![crate::tenant::DEFAULT_TENANT_ID.to_string()]
        };

        for tenant_id in tenant_ids {
            let Ok(tenant) = self.router.session_for_request(Some(&tenant_id)) else {
                continue;
            };

            if !tenant.worker_queue.can_accept_for_runner(RUNNER_ID) {
                continue;
            }

            let jobs = tenant.worker_queue.claim_batch(self.claim_batch, None);
            for job in jobs {
                tenant.worker_queue.mark_active(RUNNER_ID, job.id);
                TraceEvent::WorkerClaimed {
                    job_id: job.id.to_string(),
                    runner_id: RUNNER_ID.to_string(),
                }
                .emit();

                let job_id = job.id;
                let owner_id = job.owner_id;
                let supervisor_run_id = job.supervisor_run_id;
                let trace_id = job.trace_id.clone();
                let started_at = job.started_at;
                let event_run_id = supervisor_run_id.unwrap_or(job_id);

                tenant.event_store.append(
                    event_run_id,
                    "worker_started",
                    json!({"run_id": event_run_id, "job_id": job_id, "owner_id": owner_id}),
                );

                let tenant = tenant.clone();
                let runner = self.runner.clone();
                let resume = self.resume.clone();

                tokio::spawn(async move {
                    let outcome = runner.execute(&tenant, job).await;
                    let error = matches!(outcome.status, JobStatus::Failed | JobStatus::Timeout)
                        .then(|| outcome.summary.clone());
                    let completed = tenant.worker_queue.complete(&job_id, outcome.status, error, Some(RUNNER_ID.into()));
                    tenant.worker_queue.clear_active(RUNNER_ID);

                    let duration_ms = started_at
                        .map(|s| (chrono::Utc::now() - s).num_milliseconds().max(0))
                        .unwrap_or(0);
                    tenant.event_store.append(
                        event_run_id,
                        "worker_complete",
                        json!({
                            "run_id": event_run_id,
                            "job_id": job_id,
                            "owner_id": owner_id,
                            "status": outcome.status,
                            "duration_ms": duration_ms,
                            "trace_id": trace_id,
                        }),
                    );

                    if let (Some(run_id), Some(_job)) = (supervisor_run_id, completed) {
                        resume.resume(tenant, run_id, &tool_call_id_for(job_id), &outcome.summary);
                    }
                });
            }
        }
    }
}

/// `spawn_worker` tool calls are matched to their job by `job.id` (§4.I
/// step 2 uses the worker job id as the tool_call_id the supervisor
/// recorded when it enqueued the job).
fn tool_call_id_for(job_id: Uuid) -> String {
    job_id.to_string()
}
