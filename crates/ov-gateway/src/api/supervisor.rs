//! `POST /supervisor`, `GET /supervisor/events`, `POST /supervisor/{run_id}/cancel` (§6.1).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use ov_domain::model::WireEvent;

use crate::api::error_response::{not_found, ApiError};
use crate::api::principal::owner_id_from_headers;
use crate::state::AppState;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub task: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub preferences: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// `POST /supervisor` (§6.1). Returns immediately; the turn runs in the
/// background (§4.H, "do not block waiting for the worker").
pub async fn dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DispatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.task.trim().is_empty() {
        return Err(ov_domain::error::Error::Validation("task must not be empty".into()).into());
    }

    let owner_id = owner_id_from_headers(&headers)?;
    let tenant_header = state
        .tenant_router
        .multi_tenant()
        .then(|| headers.get(state.tenant_router.header_name()))
        .flatten()
        .and_then(|v| v.to_str().ok());
    let tenant = state.tenant_router.session_for_request(tenant_header)?;

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state
        .supervisor
        .dispatch(tenant, owner_id, req.task, req.timeout_secs, idempotency_key);

    Ok(Json(serde_json::json!({
        "run_id": outcome.run_id,
        "thread_id": outcome.thread_id,
        "status": outcome.status.to_string(),
        "stream_url": format!("/stream/runs/{}", outcome.run_id),
    })))
}

#[derive(Debug, Deserialize)]
pub struct LegacyEventsQuery {
    pub run_id: Uuid,
}

/// `GET /supervisor/events?run_id=…` — legacy SSE, no replay (§6.1).
pub async fn legacy_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LegacyEventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id_from_headers(&headers)?;
    let tenant_header = state
        .tenant_router
        .multi_tenant()
        .then(|| headers.get(state.tenant_router.header_name()))
        .flatten()
        .and_then(|v| v.to_str().ok());
    let tenant = state.tenant_router.session_for_request(tenant_header)?;

    let run = tenant
        .run_registry
        .get(&q.run_id)
        .filter(|r| r.owner_id == owner_id)
        .ok_or_else(|| not_found("run"))?;

    let mut rx = tenant.event_store.subscribe_live();
    let run_id = run.id;
    let heartbeat = std::time::Duration::from_secs(state.config.sse.heartbeat_secs);

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                recv = rx.recv() => {
                    match recv {
                        Ok(event) if event.run_id == run_id => {
                            state.supervisor_seq.increment(run_id);
                            let wire = WireEvent {
                                event_type: &event.event_type,
                                payload: &event.payload,
                                timestamp: event.created_at,
                            };
                            let data = serde_json::to_string(&wire).unwrap_or_default();
                            let is_terminal_event = event.event_type == "supervisor_complete"
                                || event.event_type == "supervisor_deferred";
                            yield Ok::<_, std::convert::Infallible>(Event::default().event(event.event_type.clone()).data(data));
                            if is_terminal_event {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = tokio::time::sleep(heartbeat) => {
                    yield Ok(Event::default().event("heartbeat").data("{}"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// `POST /supervisor/{run_id}/cancel` (§6.1, §4.K).
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id_from_headers(&headers)?;
    let tenant_header = state
        .tenant_router
        .multi_tenant()
        .then(|| headers.get(state.tenant_router.header_name()))
        .flatten()
        .and_then(|v| v.to_str().ok());
    let tenant = state.tenant_router.session_for_request(tenant_header)?;

    let run = tenant
        .run_registry
        .get(&run_id)
        .filter(|r| r.owner_id == owner_id)
        .ok_or_else(|| not_found("run"))?;

    if run.status.is_terminal() {
        return Ok(Json(serde_json::json!({
            "run_id": run.id,
            "status": run.status.to_string(),
            "message": "run already terminal, cancel is a no-op",
        })));
    }

    state.supervisor.cancel(run_id).await;
    let cancelled = tenant
        .run_registry
        .transition(&run_id, ov_domain::model::RunStatus::Cancelled, None)
        .unwrap_or(run);

    tenant.event_store.append(
        run_id,
        "supervisor_complete",
        serde_json::json!({"run_id": run_id, "owner_id": owner_id, "status": "cancelled"}),
    );

    Ok(Json(serde_json::json!({
        "run_id": cancelled.id,
        "status": cancelled.status.to_string(),
        "message": "cancelled",
    })))
}
