//! Shared scaffolding for the integration suite: builds a real [`AppState`]
//! and router wired exactly like `main.rs`, minus the network bind, so
//! requests can be driven in-process via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use ov_domain::config::Config;
use ov_gateway::dispatcher::WorkerDispatcher;
use ov_gateway::idempotency::IdempotencyCache;
use ov_gateway::model_client::{ScriptedModel, SupervisorModel, TurnOutcome};
use ov_gateway::reaper::StuckJobReaper;
use ov_gateway::resume::ResumeController;
use ov_gateway::runtime::cancel::{CancelMap, RunTaskRegistry};
use ov_gateway::runtime::seq::SupervisorSeqMap;
use ov_gateway::state::AppState;
use ov_gateway::supervisor::SupervisorService;
use ov_gateway::tenant::TenantRouter;
use ov_gateway::worker_runner::{EchoTool, WorkerRunner};

pub struct TestApp {
    pub router: axum::Router,
    pub state: AppState,
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
    /// Kept alive so the background dispatcher/reaper loops keep running for
    /// the lifetime of the test; dropping either sender would shut its loop
    /// down early.
    _dispatcher_shutdown: tokio::sync::oneshot::Sender<()>,
    _reaper_shutdown: tokio::sync::oneshot::Sender<()>,
}

/// A model that never completes within `delay` — used to force the
/// supervisor's per-turn timeout path deterministically (§4.H step 7).
pub struct SleepyModel {
    pub delay: std::time::Duration,
}

#[async_trait::async_trait]
impl SupervisorModel for SleepyModel {
    async fn complete(&self, _turn: ov_gateway::model_client::TurnRequest) -> ov_domain::error::Result<TurnOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(TurnOutcome::FinalMessage("too slow".into()))
    }
}

/// Build a full app, background dispatcher/reaper included, with a scripted
/// model that answers every turn with `final_message` unless `script` is
/// given.
pub fn build_app(multi_tenant: bool, script: Vec<TurnOutcome>) -> TestApp {
    let model: Arc<dyn SupervisorModel> = if script.is_empty() {
        Arc::new(ScriptedModel::final_message("done"))
    } else {
        Arc::new(ScriptedModel::new(script))
    };
    build_app_with_model(multi_tenant, model, true)
}

/// Like [`build_app`], but the worker dispatcher is not started — for tests
/// that want to drive job claiming/completion manually (e.g. to exercise
/// the `/resume` webhook the way an external worker process would, without
/// racing the in-process dispatcher for the same job).
pub fn build_app_no_dispatcher(multi_tenant: bool, script: Vec<TurnOutcome>) -> TestApp {
    let model: Arc<dyn SupervisorModel> = if script.is_empty() {
        Arc::new(ScriptedModel::final_message("done"))
    } else {
        Arc::new(ScriptedModel::new(script))
    };
    build_app_with_model(multi_tenant, model, false)
}

/// Build a full app with a caller-supplied model — used by tests that need
/// to control timing (e.g. the timeout scenario) rather than just outcomes.
pub fn build_app_with_model(multi_tenant: bool, model: Arc<dyn SupervisorModel>, spawn_dispatcher: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.state_dir = dir.path().to_string_lossy().into_owned();
    config.tenant.multi_tenant = multi_tenant;
    config.supervisor.default_timeout_secs = 120;
    config.worker.dispatch_tick_ms = 5;
    config.worker.claim_batch = 10;
    config.worker.job_timeout_secs = 300;
    let config = Arc::new(config);

    let tenant_router = Arc::new(TenantRouter::new(
        config.storage.state_dir.clone(),
        config.tenant.multi_tenant,
        config.tenant.header_name.clone(),
    ));
    let cancel_map = Arc::new(CancelMap::new());
    let task_registry = Arc::new(RunTaskRegistry::new());
    let idempotency = Arc::new(IdempotencyCache::new(config.idempotency.ttl_secs, config.idempotency.max_size));

    let supervisor = Arc::new(SupervisorService::new(
        model,
        idempotency.clone(),
        cancel_map.clone(),
        task_registry.clone(),
        config.supervisor.default_timeout_secs,
    ));
    let resume = Arc::new(ResumeController::new(supervisor.clone()));

    let worker_runner = Arc::new(WorkerRunner::new(Arc::new(EchoTool)));
    let dispatcher = Arc::new(WorkerDispatcher::new(
        tenant_router.clone(),
        worker_runner,
        resume.clone(),
        std::time::Duration::from_millis(config.worker.dispatch_tick_ms),
        config.worker.claim_batch,
    ));

    let reaper = Arc::new(StuckJobReaper::new(
        tenant_router.clone(),
        resume.clone(),
        std::time::Duration::from_millis(10),
        config.worker.job_timeout_secs,
    ));

    let supervisor_seq = Arc::new(SupervisorSeqMap::new());

    let state = AppState {
        config,
        tenant_router,
        supervisor,
        resume,
        idempotency,
        cancel_map,
        task_registry,
        supervisor_seq,
        api_token_hash: None,
    };

    let router = ov_gateway::api::router(state.clone()).with_state(state.clone());

    let (dispatcher_shutdown_tx, dispatcher_shutdown_rx) = tokio::sync::oneshot::channel();
    let (reaper_shutdown_tx, reaper_shutdown_rx) = tokio::sync::oneshot::channel();
    if spawn_dispatcher {
        tokio::spawn(dispatcher.run(dispatcher_shutdown_rx));
        tokio::spawn(reaper.run(reaper_shutdown_rx));
    }

    TestApp {
        router,
        state,
        dir,
        _dispatcher_shutdown: dispatcher_shutdown_tx,
        _reaper_shutdown: reaper_shutdown_tx,
    }
}

pub fn owner_header() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Poll `f` until it returns `true` or the attempt budget is exhausted.
pub async fn wait_until(mut f: impl FnMut() -> bool) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition did not become true in time");
}
