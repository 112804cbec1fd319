use std::sync::Arc;

use ov_domain::config::Config;

use crate::idempotency::IdempotencyCache;
use crate::resume::ResumeController;
use crate::runtime::cancel::{CancelMap, RunTaskRegistry};
use crate::runtime::seq::SupervisorSeqMap;
use crate::supervisor::SupervisorService;
use crate::tenant::TenantRouter;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, tenant routing
/// - **Run orchestration** — supervisor, resume controller, idempotency
/// - **Cancellation** — cancel signals, task handles
/// - **Security** — API token hash (startup-computed)
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub tenant_router: Arc<TenantRouter>,

    // ── Run orchestration ─────────────────────────────────────────────
    pub supervisor: Arc<SupervisorService>,
    pub resume: Arc<ResumeController>,
    pub idempotency: Arc<IdempotencyCache>,

    // ── Cancellation ──────────────────────────────────────────────────
    pub cancel_map: Arc<CancelMap>,
    pub task_registry: Arc<RunTaskRegistry>,

    /// Retired per-run sequence counters (§9 open question 3); only the
    /// legacy `/supervisor/events` stream still touches this.
    pub supervisor_seq: Arc<SupervisorSeqMap>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
