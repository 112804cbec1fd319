//! Per-run cancellation tokens with group fan-out (§4.K, §5 "Pending
//! supervisor tasks").
//!
//! Each running supervisor turn gets a `CancelToken`. Calling `cancel()`
//! signals the runtime to stop cooperatively. [`RunTaskRegistry`]
//! additionally tracks the `JoinHandle` for each running supervisor task so
//! the cancel endpoint can fall back to a forced abort if the cooperative
//! signal is not observed within a bounded wait.
//!
//! **Groups** support cascading cancellation: when a parent run is
//! cancelled, all children registered in its group are cancelled too (a
//! supervisor run cancelling workers it spawned, for instance).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A cancellation token that can be checked by the runtime loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per run id, with group support for
/// cascading parent→child cancellation.
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
    /// group key (parent run) → set of child run ids.
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a run.
    pub fn register(&self, run_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id, token.clone());
        token
    }

    /// Cancel a running turn for a run. Also cancels all children in the
    /// run's cancel group. Returns true if a token was found.
    pub fn cancel(&self, run_id: &Uuid) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(run_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(run_id) {
            let tokens = self.tokens.lock();
            for child_id in children {
                if let Some(child_token) = tokens.get(child_id) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    /// Remove the token for a run (called when a turn completes).
    pub fn remove(&self, run_id: &Uuid) {
        self.tokens.lock().remove(run_id);
        self.groups.lock().remove(run_id);
    }

    pub fn is_running(&self, run_id: &Uuid) -> bool {
        self.tokens.lock().contains_key(run_id)
    }

    pub fn add_to_group(&self, parent_id: Uuid, child_id: Uuid) {
        self.groups.lock().entry(parent_id).or_default().insert(child_id);
    }

    pub fn remove_from_group(&self, parent_id: &Uuid, child_id: &Uuid) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_id) {
            children.remove(child_id);
            if children.is_empty() {
                groups.remove(parent_id);
            }
        }
    }
}

/// Tracks the `JoinHandle` of each in-flight supervisor task, so `cancel`
/// can force an abort if the cooperative `CancelToken` is not honored
/// within the bounded wait (§4.K: "attempt best-effort cancel... bounded
/// 1 s wait").
#[derive(Default)]
pub struct RunTaskRegistry {
    handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl RunTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: Uuid, handle: JoinHandle<()>) {
        self.handles.lock().insert(run_id, handle);
    }

    pub fn remove(&self, run_id: &Uuid) {
        self.handles.lock().remove(run_id);
    }

    /// Wait up to `bound` for the task to finish on its own (having
    /// observed the cooperative cancel signal); if it hasn't, force-abort.
    pub async fn cancel_and_wait(&self, run_id: &Uuid, bound: Duration) {
        let handle = self.handles.lock().remove(run_id);
        let Some(handle) = handle else { return };

        if handle.is_finished() {
            return;
        }
        let abort_handle = handle.abort_handle();
        if tokio::time::timeout(bound, handle).await.is_err() {
            abort_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        let token = map.register(run_id);
        assert!(!token.is_cancelled());
        assert!(map.is_running(&run_id));

        assert!(map.cancel(&run_id));
        assert!(token.is_cancelled());

        map.remove(&run_id);
        assert!(!map.is_running(&run_id));
        assert!(!map.cancel(&run_id));
    }

    #[test]
    fn cancel_cascades_to_children() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child1 = Uuid::new_v4();
        let child2 = Uuid::new_v4();

        let parent_token = map.register(parent);
        let child1_token = map.register(child1);
        let child2_token = map.register(child2);

        map.add_to_group(parent, child1);
        map.add_to_group(parent, child2);

        map.cancel(&parent);
        assert!(parent_token.is_cancelled());
        assert!(child1_token.is_cancelled());
        assert!(child2_token.is_cancelled());
    }

    #[test]
    fn remove_from_group_cleanup() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let _parent_token = map.register(parent);
        let child_token = map.register(child);

        map.add_to_group(parent, child);
        map.remove_from_group(&parent, &child);

        map.cancel(&parent);
        assert!(!child_token.is_cancelled());
    }

    #[test]
    fn cancel_nonexistent_run_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        let old_token = map.register(run_id);
        let new_token = map.register(run_id);

        assert!(!old_token.is_cancelled());
        assert!(!new_token.is_cancelled());

        map.cancel(&run_id);
        assert!(new_token.is_cancelled());
    }

    #[tokio::test]
    async fn task_registry_removes_finished_handle_without_abort() {
        let registry = RunTaskRegistry::new();
        let run_id = Uuid::new_v4();
        let handle = tokio::spawn(async {});
        tokio::task::yield_now().await;
        registry.register(run_id, handle);

        registry.cancel_and_wait(&run_id, Duration::from_millis(100)).await;
        assert!(registry.handles.lock().get(&run_id).is_none());
    }

    #[tokio::test]
    async fn task_registry_aborts_long_running_handle() {
        let registry = RunTaskRegistry::new();
        let run_id = Uuid::new_v4();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        registry.register(run_id, handle);

        registry.cancel_and_wait(&run_id, Duration::from_millis(50)).await;
        assert!(registry.handles.lock().get(&run_id).is_none());
    }
}
