//! Tenant Router (§4.A).
//!
//! There is no relational database in this corpus (see `DESIGN.md`), so a
//! "schema" here is a dedicated subdirectory of `storage.state_dir`: each
//! tenant gets its own Event Store, Run Registry, Thread Store, and Worker
//! Queue rooted under `state_dir/tenants/<tenant_id>/`. Single-tenant mode
//! routes every request to one implicit tenant, `"default"`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ov_domain::error::Error;
use parking_lot::{Mutex, RwLock};

use crate::store::event_store::EventStore;
use crate::store::run_registry::RunRegistry;
use crate::store::thread_store::ThreadStore;
use crate::store::worker_queue::WorkerQueue;

pub const DEFAULT_TENANT_ID: &str = "default";

/// The full set of per-tenant state — the equivalent of "a connection whose
/// search_path is set to `<schema>,public`" in the original design.
pub struct TenantContext {
    pub tenant_id: String,
    pub event_store: EventStore,
    pub run_registry: RunRegistry,
    pub thread_store: ThreadStore,
    pub worker_queue: WorkerQueue,
}

impl TenantContext {
    /// Build a standalone context rooted at `root`, bypassing the router.
    /// Used by component tests that need a tenant-shaped bundle of stores
    /// without going through `TenantRouter::session_for_request`.
    #[cfg(test)]
    pub fn new_for_test(root: &std::path::Path) -> Self {
        Self::new(DEFAULT_TENANT_ID.to_string(), root.to_path_buf())
    }

    fn new(tenant_id: String, root: PathBuf) -> Self {
        std::fs::create_dir_all(&root).ok();
        Self {
            event_store: EventStore::new(root.join("events")),
            run_registry: RunRegistry::new(root.join("runs")),
            thread_store: ThreadStore::new(root.join("threads")),
            worker_queue: WorkerQueue::new(root.join("worker_jobs")),
            tenant_id,
        }
    }
}

pub struct TenantRouter {
    state_dir: PathBuf,
    multi_tenant: bool,
    header_name: String,
    /// Per-tenant locks so concurrent distinct tenants initialize in
    /// parallel (§4.A contract — "not a global lock").
    init_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    engines: RwLock<HashMap<String, Arc<TenantContext>>>,
}

impl TenantRouter {
    pub fn new(state_dir: impl Into<PathBuf>, multi_tenant: bool, header_name: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            multi_tenant,
            header_name: header_name.into(),
            init_locks: Mutex::new(HashMap::new()),
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn multi_tenant(&self) -> bool {
        self.multi_tenant
    }

    /// Resolve the tenant context for a request, given the raw header value
    /// (if present). Fails if multi-tenant routing is enabled and no header
    /// was supplied (§4.A failure semantics).
    pub fn session_for_request(&self, tenant_header: Option<&str>) -> Result<Arc<TenantContext>, Error> {
        let tenant_id = if self.multi_tenant {
            match tenant_header {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    return Err(Error::Validation(format!(
                        "multi-tenant routing is enabled but request is missing the {} header",
                        self.header_name
                    )))
                }
            }
        } else {
            DEFAULT_TENANT_ID.to_string()
        };

        Ok(self.engine_for(tenant_id))
    }

    /// All tenant ids that currently have an initialized engine — used by
    /// the Worker Dispatcher to iterate tenants once per tick (§4.F).
    pub fn known_tenants(&self) -> Vec<String> {
        self.engines.read().keys().cloned().collect()
    }

    fn engine_for(&self, tenant_id: String) -> Arc<TenantContext> {
        if let Some(existing) = self.engines.read().get(&tenant_id) {
            return existing.clone();
        }

        let lock = self
            .init_locks
            .lock()
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if let Some(existing) = self.engines.read().get(&tenant_id) {
            return existing.clone();
        }

        let root = self.state_dir.join("tenants").join(&tenant_id);
        let context = Arc::new(TenantContext::new(tenant_id.clone(), root));
        self.engines.write().insert(tenant_id, context.clone());
        context
    }
}
