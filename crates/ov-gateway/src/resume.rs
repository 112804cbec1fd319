//! Resume Controller (§4.I) — bridges a completing worker back into its
//! parent supervisor.

use std::sync::Arc;

use ov_domain::model::RunStatus;
use ov_domain::trace::TraceEvent;
use serde_json::json;
use uuid::Uuid;

use crate::supervisor::SupervisorService;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    Skipped { reason: &'static str },
}

pub struct ResumeController {
    supervisor: Arc<SupervisorService>,
}

impl ResumeController {
    pub fn new(supervisor: Arc<SupervisorService>) -> Self {
        Self { supervisor }
    }

    /// `resume(run_id, worker_result, job_id?)` (§4.I). Safe to call more
    /// than once for the same worker completion (§8.1 property 4).
    pub fn resume(
        &self,
        tenant: Arc<TenantContext>,
        run_id: Uuid,
        tool_call_id: &str,
        summary: &str,
    ) -> ResumeOutcome {
        let outcome = self.resume_inner(tenant, run_id, tool_call_id, summary);
        let outcome_label = match &outcome {
            ResumeOutcome::Resumed => "resumed".to_string(),
            ResumeOutcome::Skipped { reason } => format!("skipped: {reason}"),
        };
        TraceEvent::ResumeInvoked {
            run_id: run_id.to_string(),
            job_id: tool_call_id.to_string(),
            outcome: outcome_label,
        }
        .emit();
        outcome
    }

    fn resume_inner(
        &self,
        tenant: Arc<TenantContext>,
        run_id: Uuid,
        tool_call_id: &str,
        summary: &str,
    ) -> ResumeOutcome {
        let Some(run) = tenant.run_registry.get(&run_id) else {
            return ResumeOutcome::Skipped { reason: "run not found" };
        };

        if run.status != RunStatus::Waiting {
            return ResumeOutcome::Skipped { reason: "run not WAITING" };
        }

        let Some(assistant) = tenant
            .thread_store
            .find_spawning_assistant_message(run.thread_id, tool_call_id)
        else {
            return ResumeOutcome::Skipped { reason: "no spawning assistant message found" };
        };

        tenant
            .thread_store
            .get_or_create_tool_message(run.thread_id, tool_call_id, summary, assistant.id);

        let Some(resumed_run) = tenant.run_registry.transition(&run_id, RunStatus::Running, None) else {
            return ResumeOutcome::Skipped { reason: "run not found" };
        };

        tenant.event_store.append(
            run_id,
            "worker_summary_ready",
            json!({"run_id": run_id, "owner_id": run.owner_id, "job_id": tool_call_id, "summary": summary}),
        );

        self.supervisor.spawn_resume_turn(tenant, &resumed_run);
        ResumeOutcome::Resumed
    }
}
