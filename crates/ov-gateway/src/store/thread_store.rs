//! Supervisor singleton resolution and thread/message persistence.
//!
//! Backs §4.H step 1 (one supervisor Agent + Thread per owner, created
//! lazily under a per-owner lock) and the message-array construction used
//! by the Supervisor Service and Resume Controller.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use ov_domain::model::{Agent, AgentKind, MessageRole, Thread, ThreadMessage};
use ov_domain::trace::TraceEvent;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// One entry per owner: the lock serializes lazy creation so two
/// concurrent first-calls for the same owner don't race into two
/// supervisor agents (§4.H step 1).
struct OwnerLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, owner_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(owner_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct ThreadStore {
    state_dir: PathBuf,
    owner_locks: OwnerLocks,
    /// owner_id -> (supervisor agent, supervisor thread)
    supervisors: RwLock<HashMap<Uuid, (Agent, Thread)>>,
    /// thread_id -> messages, in append order
    messages: RwLock<HashMap<Uuid, Vec<ThreadMessage>>>,
}

impl ThreadStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(state_dir.join("threads")).ok();
        Self {
            state_dir,
            owner_locks: OwnerLocks::new(),
            supervisors: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve or create the single supervisor Agent + Thread for `owner_id`.
    pub fn supervisor_singletons(&self, owner_id: Uuid) -> (Agent, Thread) {
        if let Some(existing) = self.supervisors.read().get(&owner_id) {
            return existing.clone();
        }

        let owner_lock = self.owner_locks.lock_for(owner_id);
        let _guard = owner_lock.lock();

        // Re-check: another caller may have created it while we waited.
        if let Some(existing) = self.supervisors.read().get(&owner_id) {
            return existing.clone();
        }

        let agent = Agent {
            id: Uuid::new_v4(),
            owner_id,
            kind: AgentKind::Supervisor,
            model: "supervisor-default".into(),
            system_instructions: String::new(),
            allowed_tools: None,
        };
        let thread = Thread {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            title: "supervisor".into(),
            active: true,
        };

        self.supervisors
            .write()
            .insert(owner_id, (agent.clone(), thread.clone()));
        self.messages.write().entry(thread.id).or_default();

        (agent, thread)
    }

    fn thread_log_path(&self, thread_id: Uuid) -> PathBuf {
        self.state_dir
            .join("threads")
            .join(format!("{thread_id}.jsonl"))
    }

    fn persist(&self, thread_id: Uuid, message: &ThreadMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.thread_log_path(thread_id))
        {
            let _ = writeln!(file, "{json}");
        }
    }

    /// Append a message to a thread's history.
    pub fn append_message(&self, message: ThreadMessage) {
        self.persist(message.thread_id, &message);
        self.messages
            .write()
            .entry(message.thread_id)
            .or_default()
            .push(message);
    }

    /// All messages for a thread, in append order.
    pub fn messages(&self, thread_id: Uuid) -> Vec<ThreadMessage> {
        self.messages
            .read()
            .get(&thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Find the most recent assistant message whose `tool_calls` include
    /// `tool_call_id`; fall back to the most recent assistant-with-tool-calls
    /// message overall (§4.I step 2).
    pub fn find_spawning_assistant_message(
        &self,
        thread_id: Uuid,
        tool_call_id: &str,
    ) -> Option<ThreadMessage> {
        let messages = self.messages.read();
        let thread_messages = messages.get(&thread_id)?;

        thread_messages
            .iter()
            .rev()
            .find(|m| {
                m.role == MessageRole::Assistant
                    && m.tool_calls
                        .as_ref()
                        .is_some_and(|calls| calls.iter().any(|c| c.id == tool_call_id))
            })
            .or_else(|| {
                thread_messages
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant && m.tool_calls.is_some())
            })
            .cloned()
    }

    /// Get-or-create a tool-result message keyed by `(thread_id, tool_call_id)`
    /// (§4.I step 3, idempotent — at most one per key, §8.1 property 5).
    pub fn get_or_create_tool_message(
        &self,
        thread_id: Uuid,
        tool_call_id: &str,
        content: impl Into<String>,
        parent_id: Uuid,
    ) -> ThreadMessage {
        {
            let messages = self.messages.read();
            if let Some(existing) = messages.get(&thread_id).and_then(|msgs| {
                msgs.iter()
                    .find(|m| m.role == MessageRole::Tool && m.tool_call_id.as_deref() == Some(tool_call_id))
            }) {
                TraceEvent::ToolMessageDeduped {
                    thread_id: thread_id.to_string(),
                    tool_call_id: tool_call_id.to_string(),
                }
                .emit();
                return existing.clone();
            }
        }

        let message = ThreadMessage::tool_result(thread_id, tool_call_id, content, parent_id);
        self.append_message(message.clone());
        message
    }
}
