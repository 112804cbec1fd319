//! Supervisor Service (§4.H) — drives a supervisor run end-to-end, honoring
//! the interrupt/resume pattern.

use std::sync::Arc;
use std::time::Duration;

use ov_domain::model::{
    AgentRun, MessageRole, RunStatus, RunTrigger, ThreadMessage, ToolCallRequest,
};
use ov_domain::trace::TraceEvent;
use serde_json::json;
use uuid::Uuid;

use crate::idempotency::IdempotencyCache;
use crate::model_client::{SupervisorModel, TurnOutcome, TurnRequest};
use crate::runtime::cancel::{CancelMap, RunTaskRegistry};
use crate::tenant::TenantContext;

/// Tool call name that triggers a worker spawn (§4.H step 6).
const SPAWN_WORKER_TOOL: &str = "spawn_worker";

/// Bounded wait given to a cooperatively-cancelled supervisor task before
/// it is force-aborted (§4.K).
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(1);

pub struct DispatchOutcome {
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub status: RunStatus,
}

pub struct SupervisorService {
    model: Arc<dyn SupervisorModel>,
    idempotency: Arc<IdempotencyCache>,
    cancel_map: Arc<CancelMap>,
    task_registry: Arc<RunTaskRegistry>,
    default_timeout_secs: u64,
}

impl SupervisorService {
    pub fn new(
        model: Arc<dyn SupervisorModel>,
        idempotency: Arc<IdempotencyCache>,
        cancel_map: Arc<CancelMap>,
        task_registry: Arc<RunTaskRegistry>,
        default_timeout_secs: u64,
    ) -> Self {
        Self {
            model,
            idempotency,
            cancel_map,
            task_registry,
            default_timeout_secs,
        }
    }

    /// `POST /supervisor` (§6.1). Creates the run and returns immediately;
    /// the turn itself continues in a background task so the caller is
    /// never blocked on the LLM call (§4.H step 6, "do not block").
    pub fn dispatch(
        self: &Arc<Self>,
        tenant: Arc<TenantContext>,
        owner_id: Uuid,
        task: String,
        timeout_override: Option<u64>,
        idempotency_key: Option<String>,
    ) -> DispatchOutcome {
        if let Some(key) = &idempotency_key {
            if let Some(cached) = self.idempotency.get(key, owner_id) {
                TraceEvent::RunDispatched {
                    run_id: cached.id.to_string(),
                    owner_id: owner_id.to_string(),
                    idempotent_hit: true,
                }
                .emit();
                return DispatchOutcome {
                    run_id: cached.id,
                    thread_id: cached.thread_id,
                    status: cached.status,
                };
            }
        }

        let (agent, thread) = tenant.thread_store.supervisor_singletons(owner_id);
        let run = tenant
            .run_registry
            .create(agent.id, thread.id, owner_id, RunTrigger::Api, None);

        TraceEvent::RunDispatched {
            run_id: run.id.to_string(),
            owner_id: owner_id.to_string(),
            idempotent_hit: false,
        }
        .emit();

        if let Some(key) = idempotency_key {
            self.idempotency.put(&key, owner_id, run.clone());
        }

        tenant
            .thread_store
            .append_message(ThreadMessage::user(thread.id, task.clone()));
        tenant.event_store.append(
            run.id,
            "supervisor_started",
            json!({"run_id": run.id, "owner_id": owner_id, "task": task}),
        );

        self.spawn_turn(tenant, run.id, thread.id, owner_id, timeout_override);

        DispatchOutcome {
            run_id: run.id,
            thread_id: thread.id,
            status: RunStatus::Running,
        }
    }

    /// Re-entry point used by the Resume Controller (§4.I step 5): the run
    /// already exists and has just transitioned back to RUNNING; the next
    /// context the model sees is the tool message the Resume Controller
    /// just appended.
    pub fn spawn_resume_turn(self: &Arc<Self>, tenant: Arc<TenantContext>, run: &AgentRun) {
        self.spawn_turn(tenant, run.id, run.thread_id, run.owner_id, None);
    }

    fn spawn_turn(
        self: &Arc<Self>,
        tenant: Arc<TenantContext>,
        run_id: Uuid,
        thread_id: Uuid,
        owner_id: Uuid,
        timeout_override: Option<u64>,
    ) {
        let cancel_token = self.cancel_map.register(run_id);
        let timeout = Duration::from_secs(timeout_override.unwrap_or(self.default_timeout_secs));
        let service = self.clone();

        let handle = tokio::spawn(async move {
            service
                .run_turn_loop(tenant, run_id, thread_id, owner_id, timeout, cancel_token)
                .await;
        });
        self.task_registry.register(run_id, handle);
    }

    /// Best-effort cancel of a run's in-memory task (§4.K).
    pub async fn cancel(&self, run_id: Uuid) {
        self.cancel_map.cancel(&run_id);
        self.task_registry.cancel_and_wait(&run_id, CANCEL_GRACE_PERIOD).await;
        self.cancel_map.remove(&run_id);
    }

    fn build_turn_request(&self, tenant: &TenantContext, thread_id: Uuid) -> TurnRequest {
        let messages = tenant.thread_store.messages(thread_id);
        let (history, tool_messages): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|m| m.role != MessageRole::Tool);

        TurnRequest {
            system_prompt: String::new(),
            history,
            tool_messages,
            connector_status: String::new(),
            memory_recall: String::new(),
            current_time: chrono::Utc::now(),
        }
    }

    async fn run_turn_loop(
        &self,
        tenant: Arc<TenantContext>,
        run_id: Uuid,
        thread_id: Uuid,
        owner_id: Uuid,
        timeout: Duration,
        cancel_token: crate::runtime::cancel::CancelToken,
    ) {
        loop {
            if cancel_token.is_cancelled() {
                // `cancel()` already transitioned the run and emitted the event.
                self.task_registry.remove(&run_id);
                return;
            }

            let turn = self.build_turn_request(&tenant, thread_id);
            let result = tokio::time::timeout(timeout, self.model.complete(turn)).await;

            match result {
                Err(_elapsed) => {
                    // §4.H step 7 / §7: timeout is not a failure.
                    tenant.run_registry.transition(&run_id, RunStatus::Deferred, None);
                    tenant.event_store.append(
                        run_id,
                        "supervisor_deferred",
                        json!({"run_id": run_id, "owner_id": owner_id, "message": "supervisor turn timed out"}),
                    );
                    self.finish(run_id);
                    return;
                }
                Ok(Err(e)) => {
                    tenant
                        .run_registry
                        .transition(&run_id, RunStatus::Failed, Some(e.to_string()));
                    tenant.event_store.append(
                        run_id,
                        "error",
                        json!({"run_id": run_id, "owner_id": owner_id, "message": e.to_string()}),
                    );
                    self.finish(run_id);
                    return;
                }
                Ok(Ok(TurnOutcome::FinalMessage(text))) => {
                    let mut assistant = ThreadMessage::user(thread_id, text.clone());
                    assistant.role = MessageRole::Assistant;
                    tenant.thread_store.append_message(assistant);

                    tenant.run_registry.transition(&run_id, RunStatus::Success, None);
                    tenant.event_store.append(
                        run_id,
                        "supervisor_complete",
                        json!({"run_id": run_id, "owner_id": owner_id, "status": "success", "message": text}),
                    );
                    self.finish(run_id);
                    return;
                }
                Ok(Ok(TurnOutcome::ToolCall(call))) => {
                    if call.name == SPAWN_WORKER_TOOL {
                        let task_text = call
                            .arguments
                            .get("task")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let model_name = call
                            .arguments
                            .get("model")
                            .and_then(|v| v.as_str())
                            .unwrap_or("default")
                            .to_string();

                        let job = tenant.worker_queue.enqueue(
                            owner_id,
                            task_text.clone(),
                            model_name,
                            Some(call.arguments.clone()),
                            Some(run_id),
                        );

                        // The job id, not the model's tool_call id, is what
                        // the Resume Controller later looks up by — it is
                        // the only identifier guaranteed to survive the
                        // async round trip through the Worker Dispatcher.
                        let mut spawn_call = call.clone();
                        spawn_call.id = job.id.to_string();
                        self.record_tool_call(&tenant, thread_id, &spawn_call);

                        tenant.run_registry.transition(&run_id, RunStatus::Waiting, None);
                        tenant.event_store.append(
                            run_id,
                            "worker_spawned",
                            json!({"run_id": run_id, "owner_id": owner_id, "job_id": job.id, "task": task_text}),
                        );
                        self.finish(run_id);
                        return;
                    }

                    // Any other tool call is executed inline (real tool
                    // implementations are an external collaborator, §1
                    // Non-goals) and the loop continues.
                    self.record_tool_call(&tenant, thread_id, &call);
                    continue;
                }
            }
        }
    }

    fn finish(&self, run_id: Uuid) {
        self.cancel_map.remove(&run_id);
        self.task_registry.remove(&run_id);
    }

    /// Append the assistant's tool-call message, then a placeholder tool
    /// result so the loop can continue deterministically for tool calls
    /// other than `spawn_worker` (whose result arrives asynchronously via
    /// the Resume Controller instead).
    fn record_tool_call(&self, tenant: &TenantContext, thread_id: Uuid, call: &ToolCallRequest) {
        let mut assistant = ThreadMessage::user(thread_id, String::new());
        assistant.role = MessageRole::Assistant;
        assistant.tool_calls = Some(vec![call.clone()]);
        let assistant_id = assistant.id;
        tenant.thread_store.append_message(assistant);

        if call.name != SPAWN_WORKER_TOOL {
            tenant.thread_store.get_or_create_tool_message(
                thread_id,
                &call.id,
                format!("tool \"{}\" executed", call.name),
                assistant_id,
            );
        }
    }
}
