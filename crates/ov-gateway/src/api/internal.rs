//! `POST /jarvis/internal/runs/{run_id}/resume` — worker completion webhook (§6.1).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::principal::owner_id_from_headers;
use crate::api::error_response::ApiError;
use crate::resume::ResumeOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResumeWebhookRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result_summary: String,
}

pub async fn resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
    Json(req): Json<ResumeWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Internal callers still identify the owning tenant/principal the same
    // way external callers do; there is no separate internal identity.
    let _owner_id = owner_id_from_headers(&headers)?;
    let tenant_header = state
        .tenant_router
        .multi_tenant()
        .then(|| headers.get(state.tenant_router.header_name()))
        .flatten()
        .and_then(|v| v.to_str().ok());
    let tenant = state.tenant_router.session_for_request(tenant_header)?;

    let summary = if req.status == "success" {
        req.result_summary
    } else {
        format!("worker {} failed: {}", req.job_id, req.result_summary)
    };

    let outcome = state
        .resume
        .resume(tenant, run_id, &req.job_id.to_string(), &summary);

    let (status, reason) = match outcome {
        ResumeOutcome::Resumed => ("resumed", None),
        ResumeOutcome::Skipped { reason } => ("skipped", Some(reason)),
    };

    Ok(Json(serde_json::json!({
        "status": status,
        "run_id": run_id,
        "reason": reason,
    })))
}
