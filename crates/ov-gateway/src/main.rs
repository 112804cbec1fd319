use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use ov_domain::config::{Config, ConfigSeverity};
use tower_http::cors::{AllowOrigin, CorsLayer};

use ov_gateway::cli::{Cli, Command, ConfigCommand};
use ov_gateway::dispatcher::WorkerDispatcher;
use ov_gateway::idempotency::IdempotencyCache;
use ov_gateway::model_client::{ScriptedModel, SupervisorModel, TurnOutcome};
use ov_gateway::reaper::StuckJobReaper;
use ov_gateway::resume::ResumeController;
use ov_gateway::runtime::cancel::{CancelMap, RunTaskRegistry};
use ov_gateway::state::AppState;
use ov_gateway::supervisor::SupervisorService;
use ov_gateway::tenant::TenantRouter;
use ov_gateway::worker_runner::{EchoTool, WorkerRunner};
use sha2::{Digest, Sha256};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = ov_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = ov_gateway::cli::load_config()?;
            let ok = ov_gateway::cli::doctor::run(&config, &config_path).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = ov_gateway::cli::load_config()?;
            if !ov_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = ov_gateway::cli::load_config()?;
            ov_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("overseer {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ov_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("overseer starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    std::fs::create_dir_all(&config.storage.state_dir)
        .with_context(|| format!("creating state dir {}", config.storage.state_dir))?;

    // ── Tenant router (§4.A) ──────────────────────────────────────────
    let tenant_router = Arc::new(TenantRouter::new(
        config.storage.state_dir.clone(),
        config.tenant.multi_tenant,
        config.tenant.header_name.clone(),
    ));
    tracing::info!(
        multi_tenant = config.tenant.multi_tenant,
        "tenant router ready"
    );

    // ── Cancellation + task tracking (§4.K) ───────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let task_registry = Arc::new(RunTaskRegistry::new());

    // ── Idempotency cache (§4.H) ──────────────────────────────────────
    let idempotency = Arc::new(IdempotencyCache::new(
        config.idempotency.ttl_secs,
        config.idempotency.max_size,
    ));
    tracing::info!(
        ttl_secs = config.idempotency.ttl_secs,
        max_size = config.idempotency.max_size,
        "idempotency cache ready"
    );

    // ── Supervisor model (§9 "Dynamic dispatch") ──────────────────────
    // No live provider ships with this crate (§1 Non-goals); the scripted
    // model keeps the server bootable out of the box for local exercising
    // and smoke-testing the orchestration plumbing end to end.
    let model: Arc<dyn SupervisorModel> = Arc::new(ScriptedModel::new(vec![
        TurnOutcome::FinalMessage(
            "no live model is configured; set up a SupervisorModel to answer real tasks".into(),
        ),
    ]));
    tracing::warn!("no live SupervisorModel configured — using a scripted placeholder");

    let supervisor = Arc::new(SupervisorService::new(
        model,
        idempotency.clone(),
        cancel_map.clone(),
        task_registry.clone(),
        config.supervisor.default_timeout_secs,
    ));
    tracing::info!(
        default_timeout_secs = config.supervisor.default_timeout_secs,
        "supervisor service ready"
    );

    let resume = Arc::new(ResumeController::new(supervisor.clone()));

    // ── Worker runner + dispatcher (§4.F, §4.G) ───────────────────────
    let worker_runner = Arc::new(WorkerRunner::new(Arc::new(EchoTool)));
    let dispatcher = Arc::new(WorkerDispatcher::new(
        tenant_router.clone(),
        worker_runner,
        resume.clone(),
        std::time::Duration::from_millis(config.worker.dispatch_tick_ms),
        config.worker.claim_batch,
    ));
    tracing::info!(
        dispatch_tick_ms = config.worker.dispatch_tick_ms,
        claim_batch = config.worker.claim_batch,
        "worker dispatcher ready"
    );

    // ── Stuck-job reaper (§10.1) ───────────────────────────────────────
    let reaper = Arc::new(StuckJobReaper::new(
        tenant_router.clone(),
        resume.clone(),
        std::time::Duration::from_secs(15),
        config.worker.job_timeout_secs,
    ));
    tracing::info!(
        job_timeout_secs = config.worker.job_timeout_secs,
        "stuck-job reaper ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    let supervisor_seq = Arc::new(ov_gateway::runtime::seq::SupervisorSeqMap::new());

    let state = AppState {
        config: config.clone(),
        tenant_router: tenant_router.clone(),
        supervisor,
        resume,
        idempotency: idempotency.clone(),
        cancel_map,
        task_registry,
        supervisor_seq: supervisor_seq.clone(),
        api_token_hash,
    };

    // ── Background: worker dispatcher tick loop ──────────────────────
    let (_dispatcher_shutdown_tx, dispatcher_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(dispatcher.run(dispatcher_shutdown_rx));

    // ── Background: stuck-job reaper tick loop ───────────────────────
    let (_reaper_shutdown_tx, reaper_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(reaper.run(reaper_shutdown_rx));

    // ── Background: idempotency cache eviction (§10.1) ───────────────
    {
        let idempotency = idempotency.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                idempotency.evict_expired();
            }
        });
    }
    tracing::info!("idempotency eviction sweep started (60s tick)");

    // ── Background: SupervisorSeq sweep (§9 open question 3, §10.1) ──
    {
        let tenant_router = tenant_router.clone();
        let sse_heartbeat = chrono::Duration::seconds(config.sse.heartbeat_secs as i64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let tenant_ids = if tenant_router.multi_tenant() {
                    tenant_router.known_tenants()
                } else {
                    vec![ov_gateway::tenant::DEFAULT_TENANT_ID.to_string()]
                };
                let cutoff = chrono::Utc::now() - sse_heartbeat;
                for tenant_id in tenant_ids {
                    let Ok(tenant) = tenant_router.session_for_request(Some(&tenant_id)) else {
                        continue;
                    };
                    let terminal = tenant.run_registry.terminal_run_ids_finished_before(cutoff);
                    if !terminal.is_empty() {
                        supervisor_seq.sweep(&terminal);
                    }
                }
            }
        });
    }
    tracing::info!("SupervisorSeq sweep started (60s tick)");

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = std::env::var("OVERSEER_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Rate-limit layer (per-IP token bucket via governor) ─────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    // ── Router ───────────────────────────────────────────────────────
    let router = ov_gateway::api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state)
    } else {
        router.with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "overseer listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &ov_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
