use serde::Serialize;

/// Structured trace events emitted across the overseer crates, independent
/// of the wire `AgentRunEvent`s a run persists — these are for operator-facing
/// logs, not for SSE consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RunDispatched {
        run_id: String,
        owner_id: String,
        idempotent_hit: bool,
    },
    RunTransitioned {
        run_id: String,
        from: String,
        to: String,
    },
    WorkerClaimed {
        job_id: String,
        runner_id: String,
    },
    WorkerReaped {
        job_id: String,
        supervisor_run_id: Option<String>,
    },
    ResumeInvoked {
        run_id: String,
        job_id: String,
        outcome: String,
    },
    ToolMessageDeduped {
        thread_id: String,
        tool_call_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "overseer_event");
    }
}
