//! Stuck-job reaper (§10.1, resolving open question 1): any `WorkerJob`
//! left `running` past its job timeout is force-transitioned to `timeout`
//! and, if it has a parent run, the Resume Controller is still invoked so
//! the run is not left WAITING forever.

use std::sync::Arc;
use std::time::Duration;

use ov_domain::model::JobStatus;
use ov_domain::trace::TraceEvent;

use crate::resume::ResumeController;
use crate::tenant::TenantRouter;

pub struct StuckJobReaper {
    router: Arc<TenantRouter>,
    resume: Arc<ResumeController>,
    tick: Duration,
    job_timeout: chrono::Duration,
}

impl StuckJobReaper {
    pub fn new(
        router: Arc<TenantRouter>,
        resume: Arc<ResumeController>,
        tick: Duration,
        job_timeout_secs: u64,
    ) -> Self {
        Self {
            router,
            resume,
            tick,
            job_timeout: chrono::Duration::seconds(job_timeout_secs as i64),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = interval.tick() => self.sweep(),
            }
        }
    }

    fn sweep(&self) {
        let tenant_ids = if self.router.multi_tenant() {
            self.router.known_tenants()
        } else {
            vec![crate::tenant::DEFAULT_TENANT_ID.to_string()]
        };

        let deadline = chrono::Utc::now() - self.job_timeout;

        for tenant_id in tenant_ids {
            let Ok(tenant) = self.router.session_for_request(Some(&tenant_id)) else {
                continue;
            };

            for job in tenant.worker_queue.running_started_before(deadline) {
                let Some(completed) = tenant.worker_queue.complete(
                    &job.id,
                    JobStatus::Timeout,
                    Some("worker job exceeded its timeout".into()),
                    None,
                ) else {
                    continue;
                };
                tracing::warn!(job_id = %job.id, owner_id = %job.owner_id, "reaped stuck worker job");
                TraceEvent::WorkerReaped {
                    job_id: job.id.to_string(),
                    supervisor_run_id: completed.supervisor_run_id.map(|id| id.to_string()),
                }
                .emit();

                if let Some(run_id) = completed.supervisor_run_id {
                    self.resume
                        .resume(tenant.clone(), run_id, &job.id.to_string(), "worker job timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IdempotencyCache;
    use crate::model_client::{ScriptedModel, SupervisorModel};
    use crate::runtime::cancel::{CancelMap, RunTaskRegistry};
    use crate::supervisor::SupervisorService;
    use ov_domain::model::{MessageRole, RunStatus, RunTrigger, ThreadMessage, ToolCallRequest};
    use uuid::Uuid;

    fn reaper(router: Arc<TenantRouter>, tick: Duration, job_timeout_secs: u64) -> Arc<StuckJobReaper> {
        let model: Arc<dyn SupervisorModel> = Arc::new(ScriptedModel::final_message("resumed"));
        let supervisor = Arc::new(SupervisorService::new(
            model,
            Arc::new(IdempotencyCache::new(600, 100)),
            Arc::new(CancelMap::new()),
            Arc::new(RunTaskRegistry::new()),
            120,
        ));
        Arc::new(StuckJobReaper::new(
            router,
            Arc::new(ResumeController::new(supervisor)),
            tick,
            job_timeout_secs,
        ))
    }

    #[tokio::test]
    async fn sweep_times_out_stuck_job_and_resumes_its_run() {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(TenantRouter::new(dir.path(), false, "X-Worker-Id"));
        let tenant = router.session_for_request(None).unwrap();

        let owner = Uuid::new_v4();
        let (agent, thread) = tenant.thread_store.supervisor_singletons(owner);
        let run = tenant.run_registry.create(agent.id, thread.id, owner, RunTrigger::Api, None);
        let job = tenant.worker_queue.enqueue(owner, "slow task", "default", None, Some(run.id));
        tenant.worker_queue.claim_batch(10, None);

        let mut assistant = ThreadMessage::user(thread.id, String::new());
        assistant.role = MessageRole::Assistant;
        assistant.tool_calls = Some(vec![ToolCallRequest {
            id: job.id.to_string(),
            name: "spawn_worker".into(),
            arguments: serde_json::json!({}),
        }]);
        tenant.thread_store.append_message(assistant);
        tenant.run_registry.transition(&run.id, RunStatus::Waiting, None);

        // job_timeout_secs = 0 means "started at all" counts as stuck.
        let reaper = reaper(router, Duration::from_millis(10), 0);
        reaper.sweep();

        let job_after = tenant.worker_queue.get(&job.id).unwrap();
        assert_eq!(job_after.status, ov_domain::model::JobStatus::Timeout);
        assert!(job_after.error.is_some());

        for _ in 0..50 {
            if tenant.run_registry.get(&run.id).unwrap().status != RunStatus::Waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_ne!(tenant.run_registry.get(&run.id).unwrap().status, RunStatus::Waiting);
    }

    #[tokio::test]
    async fn sweep_ignores_jobs_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(TenantRouter::new(dir.path(), false, "X-Worker-Id"));
        let tenant = router.session_for_request(None).unwrap();

        let job = tenant.worker_queue.enqueue(Uuid::new_v4(), "quick", "default", None, None);
        tenant.worker_queue.claim_batch(10, None);

        let reaper = reaper(router, Duration::from_millis(10), 300);
        reaper.sweep();

        let job_after = tenant.worker_queue.get(&job.id).unwrap();
        assert_eq!(job_after.status, ov_domain::model::JobStatus::Running);
    }
}
