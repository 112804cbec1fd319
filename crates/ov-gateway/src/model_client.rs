//! The supervisor's LLM collaborator (§9 "Dynamic dispatch", §10.6).
//!
//! Real provider integration is out of scope (§1 Non-goals) — this module
//! defines the capability boundary the Supervisor Service talks to and
//! ships a deterministic test double, [`ScriptedModel`], so the orchestration
//! logic around it can be exercised without a live LLM.

use std::sync::Mutex;

use ov_domain::error::Result;
use ov_domain::model::{ThreadMessage, ToolCallRequest};

/// The cache-optimized message array built per §4.H step 4: most stable
/// content first, most volatile last, so a stable prefix can be cached by
/// whatever sits behind [`SupervisorModel`].
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub system_prompt: String,
    pub history: Vec<ThreadMessage>,
    pub tool_messages: Vec<ThreadMessage>,
    pub connector_status: String,
    pub memory_recall: String,
    pub current_time: chrono::DateTime<chrono::Utc>,
}

/// What the model did with one turn.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The model produced a final answer for the user.
    FinalMessage(String),
    /// The model invoked a tool (possibly `spawn_worker`).
    ToolCall(ToolCallRequest),
}

/// Capability boundary for driving one supervisor turn. Implementations
/// are provider-specific adapters; this crate ships no live provider.
#[async_trait::async_trait]
pub trait SupervisorModel: Send + Sync {
    async fn complete(&self, turn: TurnRequest) -> Result<TurnOutcome>;
}

/// A deterministic test double that replays a fixed script of outcomes,
/// one per call. Panics (via an `Internal` error) if the script runs dry —
/// tests should provide exactly as many entries as turns taken.
pub struct ScriptedModel {
    script: Mutex<std::collections::VecDeque<TurnOutcome>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<TurnOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn final_message(text: impl Into<String>) -> Self {
        Self::new(vec![TurnOutcome::FinalMessage(text.into())])
    }
}

#[async_trait::async_trait]
impl SupervisorModel for ScriptedModel {
    async fn complete(&self, _turn: TurnRequest) -> Result<TurnOutcome> {
        self.script
            .lock()
            .expect("scripted model mutex poisoned")
            .pop_front()
            .ok_or_else(|| ov_domain::error::Error::Internal("ScriptedModel script exhausted".into()))
    }
}
