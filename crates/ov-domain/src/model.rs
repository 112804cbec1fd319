use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User / Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Supervisor,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: AgentKind,
    pub model: String,
    pub system_instructions: String,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread / ThreadMessage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub internal: bool,
}

impl ThreadMessage {
    pub fn user(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            role: MessageRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            sent_at: Utc::now(),
            parent_id: None,
            processed: false,
            internal: false,
        }
    }

    pub fn tool_result(
        thread_id: Uuid,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        parent_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            sent_at: Utc::now(),
            parent_id: Some(parent_id),
            processed: false,
            internal: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentRun
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Success,
    Failed,
    Deferred,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses per §3.1 and §6.3: SUCCESS, FAILED, DEFERRED, CANCELLED.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Deferred | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Deferred => "deferred",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Api,
    Schedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub thread_id: Uuid,
    pub owner_id: Uuid,
    pub status: RunStatus,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentRun {
    pub fn new(agent_id: Uuid, thread_id: Uuid, owner_id: Uuid, trigger: RunTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            thread_id,
            owner_id,
            status: RunStatus::Running,
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WorkerJob
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub supervisor_run_id: Option<Uuid>,
    pub task: String,
    pub model: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    pub status: JobStatus,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    pub trace_id: String,
}

impl WorkerJob {
    pub fn new(
        owner_id: Uuid,
        supervisor_run_id: Option<Uuid>,
        task: impl Into<String>,
        model: impl Into<String>,
        config: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            supervisor_run_id,
            task: task.into(),
            model: model.into(),
            config,
            status: JobStatus::Queued,
            worker_id: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
            error: None,
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentRunEvent ("persisted event") — §4.B / §6.2
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunEvent {
    /// Monotonic, strictly increasing within a `run_id` (§3.1 invariant).
    pub id: u64,
    pub run_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The JSON shape an SSE `data:` line carries, per §6.2.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
