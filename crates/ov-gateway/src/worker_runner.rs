//! Worker Runner (§4.G) — executes one [`WorkerJob`] end to end.
//!
//! Real tool execution is an external collaborator (§1 Non-goals); what
//! lives here is the lifecycle scaffolding around it: progress events,
//! heartbeats, and a terminal summary, all tagged with the job's
//! `supervisor_run_id` so the SSE layer can attribute them to a run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ov_domain::error::Result;
use ov_domain::model::{JobStatus, WorkerJob};
use serde_json::json;
use uuid::Uuid;

use crate::tenant::TenantContext;

/// How often a long-running job emits `worker_heartbeat` (§4.G, "at least
/// every 30 seconds while running").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// What the worker produced for its one job. `status` carries the tool's
/// own verdict (§4.G `{worker_id, status, error?, output?}`); a tool can
/// report `Failed` without returning `Err`, and an `Err` is always folded
/// into `Failed` with `summary` holding the error text.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub status: JobStatus,
    pub summary: String,
}

/// The pluggable unit of work a job actually runs. This crate ships no
/// real tool implementations; callers supply their own.
#[async_trait]
pub trait WorkerTool: Send + Sync {
    async fn run(&self, job: &WorkerJob) -> Result<WorkerOutcome>;
}

/// A trivial tool that echoes the job's task back as its summary —
/// useful as a default when no real tool is configured, and in tests.
pub struct EchoTool;

#[async_trait]
impl WorkerTool for EchoTool {
    async fn run(&self, job: &WorkerJob) -> Result<WorkerOutcome> {
        Ok(WorkerOutcome {
            status: JobStatus::Success,
            summary: format!("completed: {}", job.task),
        })
    }
}

pub struct WorkerRunner {
    tool: Arc<dyn WorkerTool>,
}

impl WorkerRunner {
    pub fn new(tool: Arc<dyn WorkerTool>) -> Self {
        Self { tool }
    }

    /// Run `job` to completion, emitting lifecycle events on `tenant`'s
    /// event store for `job.supervisor_run_id` if set, else a synthetic
    /// per-job event stream keyed by the job id.
    pub async fn execute(&self, tenant: &TenantContext, job: WorkerJob) -> WorkerOutcome {
        let event_run_id = job.supervisor_run_id.unwrap_or(job.id);

        self.emit(tenant, event_run_id, job.id, "worker_tool_started", json!({"task": job.task}));

        let tool = self.tool.clone();
        let job_for_tool = job.clone();
        let run_fut = tool.run(&job_for_tool);
        tokio::pin!(run_fut);

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; discard it

        let result = loop {
            tokio::select! {
                result = &mut run_fut => break result,
                _ = heartbeat.tick() => {
                    self.emit(tenant, event_run_id, job.id, "worker_heartbeat", json!({}));
                }
            }
        };

        match result {
            Ok(outcome) => {
                self.emit(
                    tenant,
                    event_run_id,
                    job.id,
                    "worker_tool_completed",
                    json!({"summary": outcome.summary}),
                );
                outcome
            }
            Err(e) => {
                self.emit(
                    tenant,
                    event_run_id,
                    job.id,
                    "worker_tool_failed",
                    json!({"error": e.to_string()}),
                );
                WorkerOutcome {
                    status: JobStatus::Failed,
                    summary: e.to_string(),
                }
            }
        }
    }

    fn emit(
        &self,
        tenant: &TenantContext,
        run_id: Uuid,
        job_id: Uuid,
        event_type: &str,
        mut payload: serde_json::Value,
    ) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("run_id".into(), json!(run_id));
            obj.insert("job_id".into(), json!(job_id));
        }
        tenant.event_store.append(run_id, event_type, payload);
    }
}
