//! `GET /stream/runs/{run_id}` — resumable SSE with replay (§4.J).
//!
//! Subscribes to live events *before* loading history, so no event
//! published in between is lost; replays everything after the client's
//! cursor, then switches to the live feed, de-duplicating the boundary by
//! `last_sent_event_id`. Heartbeats fill idle gaps. The stream closes once
//! the supervisor has reached a terminal state and no spawned worker still
//! has events pending.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use ov_domain::model::{AgentRunEvent, WireEvent};

use crate::api::error_response::{not_found, ApiError};
use crate::api::principal::owner_id_from_headers;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub after_event_id: Option<u64>,
    #[serde(default = "default_true")]
    pub include_tokens: bool,
}

fn default_true() -> bool {
    true
}

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub async fn run_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
    Query(q): Query<StreamQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id_from_headers(&headers)?;
    let tenant_header = state
        .tenant_router
        .multi_tenant()
        .then(|| headers.get(state.tenant_router.header_name()))
        .flatten()
        .and_then(|v| v.to_str().ok());
    let tenant = state.tenant_router.session_for_request(tenant_header)?;

    // Ownership is checked *before* replay; mismatches look exactly like a
    // missing run — 404, never 403 (§6.1, §8.2 "ownership leak resistance").
    tenant
        .run_registry
        .get(&run_id)
        .filter(|r| r.owner_id == owner_id)
        .ok_or_else(|| not_found("run"))?;

    let cursor = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or(q.after_event_id)
        .unwrap_or(0);

    let include_tokens = q.include_tokens;
    let heartbeat = Duration::from_secs(state.config.sse.heartbeat_secs);

    // Subscribe BEFORE replay so nothing published concurrently is missed.
    let mut live_rx = tenant.event_store.subscribe_live();
    let history = tenant.event_store.events_after(run_id, cursor);

    let stream = async_stream::stream! {
        let mut last_sent: u64 = cursor;
        let mut pending_workers: HashSet<Uuid> = HashSet::new();
        let mut supervisor_done = false;

        for event in history {
            if event.id <= last_sent {
                continue;
            }
            last_sent = event.id;
            if let Some(sse) = to_sse(&event, include_tokens) {
                track_lifecycle(&event, &mut pending_workers, &mut supervisor_done);
                yield Ok::<_, std::convert::Infallible>(sse);
            }
        }

        if supervisor_done && pending_workers.is_empty() {
            return;
        }

        yield Ok(Event::default().event("heartbeat").data("\"live stream started\""));

        loop {
            tokio::select! {
                recv = live_rx.recv() => {
                    match recv {
                        Ok(event) if event.run_id == run_id => {
                            if event.id <= last_sent {
                                continue;
                            }
                            last_sent = event.id;
                            if let Some(sse) = to_sse(&event, include_tokens) {
                                track_lifecycle(&event, &mut pending_workers, &mut supervisor_done);
                                yield Ok(sse);
                            }
                            if supervisor_done && pending_workers.is_empty() {
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

/// Progress events from a worker carry `job_id` but are keyed to a run; a
/// `worker_tool_*` event missing `run_id` is dropped outright (§6.2).
fn to_sse(event: &AgentRunEvent, include_tokens: bool) -> Option<Event> {
    if event.event_type.starts_with("worker_tool_") && event.payload.get("run_id").is_none() {
        return None;
    }
    if !include_tokens && event.event_type == "supervisor_token" {
        return None;
    }

    let wire = WireEvent {
        event_type: &event.event_type,
        payload: &event.payload,
        timestamp: event.created_at,
    };
    let data = serde_json::to_string(&wire).ok()?;
    Some(
        Event::default()
            .id(event.id.to_string())
            .event(event.event_type.clone())
            .data(data),
    )
}

fn track_lifecycle(event: &AgentRunEvent, pending_workers: &mut HashSet<Uuid>, supervisor_done: &mut bool) {
    match event.event_type.as_str() {
        "worker_spawned" => {
            if let Some(job_id) = event.payload.get("job_id").and_then(|v| v.as_str()) {
                if let Ok(id) = Uuid::parse_str(job_id) {
                    pending_workers.insert(id);
                }
            }
        }
        "worker_summary_ready" | "worker_complete" => {
            if let Some(job_id) = event.payload.get("job_id").and_then(|v| v.as_str()) {
                if let Ok(id) = Uuid::parse_str(job_id) {
                    pending_workers.remove(&id);
                }
            }
        }
        "supervisor_complete" | "supervisor_deferred" => {
            *supervisor_done = true;
        }
        _ => {}
    }
}
