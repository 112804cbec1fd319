//! End-to-end orchestration scenarios (§8.2) driven through the real HTTP
//! surface with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{build_app, build_app_with_model, owner_header, wait_until, SleepyModel};
use ov_domain::model::{RunStatus, ToolCallRequest};
use ov_gateway::model_client::TurnOutcome;
use std::sync::Arc;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn dispatch_with_final_message_reaches_success() {
    let app = build_app(false, vec![]);
    let owner = owner_header();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .header("x-owner-id", &owner)
                .body(Body::from(json!({"task": "do the thing"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "running");
    let run_id: uuid::Uuid = body["run_id"].as_str().unwrap().parse().unwrap();

    let tenant = app.state.tenant_router.session_for_request(None).unwrap();
    wait_until(|| {
        tenant
            .run_registry
            .get(&run_id)
            .map(|r| r.status == RunStatus::Success)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn dispatch_spawn_worker_is_claimed_and_resumed_to_success() {
    let script = vec![
        TurnOutcome::ToolCall(ToolCallRequest {
            id: "call_1".into(),
            name: "spawn_worker".into(),
            arguments: json!({"task": "investigate", "model": "default"}),
        }),
        TurnOutcome::FinalMessage("wrapped up after the worker finished".into()),
    ];
    let app = build_app(false, script);
    let owner = owner_header();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .header("x-owner-id", &owner)
                .body(Body::from(json!({"task": "investigate this"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    let run_id: uuid::Uuid = body["run_id"].as_str().unwrap().parse().unwrap();

    let tenant = app.state.tenant_router.session_for_request(None).unwrap();

    wait_until(|| {
        tenant
            .run_registry
            .get(&run_id)
            .map(|r| r.status == RunStatus::Waiting)
            .unwrap_or(false)
    })
    .await;

    // The background dispatcher (spawned by `build_app`) claims the job,
    // runs it through `EchoTool`, and invokes the Resume Controller, which
    // re-enters the supervisor for the second scripted turn.
    wait_until(|| {
        tenant
            .run_registry
            .get(&run_id)
            .map(|r| r.status == RunStatus::Success)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn dispatch_timeout_transitions_to_deferred() {
    // `SleepyModel` always takes longer than the request's timeout
    // override, so the supervisor's per-turn timeout fires deterministically
    // instead of racing a fast scripted response (§4.H step 7).
    let model: Arc<dyn ov_gateway::model_client::SupervisorModel> =
        Arc::new(SleepyModel { delay: std::time::Duration::from_millis(300) });
    let app = build_app_with_model(false, model, true);
    let owner = owner_header();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .header("x-owner-id", &owner)
                .body(Body::from(json!({"task": "x", "timeout_secs": 0}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    let run_id: uuid::Uuid = body["run_id"].as_str().unwrap().parse().unwrap();

    let tenant = app.state.tenant_router.session_for_request(None).unwrap();
    wait_until(|| {
        tenant
            .run_registry
            .get(&run_id)
            .map(|r| r.status.is_terminal())
            .unwrap_or(false)
    })
    .await;

    let run = tenant.run_registry.get(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Deferred);
}

#[tokio::test]
async fn cancel_mid_run_transitions_to_cancelled() {
    // A model that takes a while to answer keeps the run in RUNNING long
    // enough that the cancel request below is guaranteed to observe it
    // in-flight rather than racing it to SUCCESS.
    let model: Arc<dyn ov_gateway::model_client::SupervisorModel> =
        Arc::new(SleepyModel { delay: std::time::Duration::from_secs(5) });
    let app = build_app_with_model(false, model, true);
    let owner = owner_header();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .header("x-owner-id", &owner)
                .body(Body::from(json!({"task": "long task"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let cancel_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/supervisor/{run_id}/cancel"))
                .header("x-owner-id", &owner)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(cancel_response.status(), StatusCode::OK);
    let body = body_json(cancel_response).await;
    assert!(body["status"] == "cancelled" || body["message"] == "cancelled");
}

#[tokio::test]
async fn dispatch_rejects_empty_task() {
    let app = build_app(false, vec![]);
    let owner = owner_header();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .header("x-owner-id", &owner)
                .body(Body::from(json!({"task": "   "}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dispatch_missing_owner_header_is_rejected() {
    let app = build_app(false, vec![]);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/supervisor")
                .header("content-type", "application/json")
                .body(Body::from(json!({"task": "x"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
