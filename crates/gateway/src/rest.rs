//! REST surface: synchronous submit/result/stream endpoints plus the
//! read-only and privileged administrative endpoints from §6. Routed with
//! the same `Router` + `with_state` shape as the teacher's
//! `infrastructure/mcp/http_server.rs`.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use conclave::domain::models::message::MessagePayload;
use conclave::domain::models::task::{Payload, TaskId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .route("/v1/tasks", post(submit_task))
        .route("/v1/tasks/{id}/result", get(get_result))
        .route("/v1/admin/agents", get(list_agents))
        .route("/v1/admin/providers", get(list_providers))
        .route("/v1/admin/routes", get(list_routes))
        .route("/v1/admin/providers/{id}/disable", post(disable_provider))
        .route("/v1/admin/providers/{id}/enable", post(enable_provider))
        .route("/v1/admin/providers/{id}/configure", post(configure_provider))
        .route("/v1/admin/agents/{id}/deregister", post(deregister_agent))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn authorized(headers: &HeaderMap, state: &AppState) -> bool {
    let _ = state;
    headers.get("authorization").is_some()
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    task_type: String,
    text: String,
    priority: u8,
    deadline_ms: Option<u64>,
    principal: String,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: TaskId,
}

async fn submit_task(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> impl IntoResponse {
    let now = Utc::now();
    let deadline = req.deadline_ms.map(|ms| now + chrono::Duration::milliseconds(ms as i64));
    let result = state
        .orchestrator
        .submit_task(
            Uuid::new_v4(),
            req.principal,
            &req.task_type,
            Payload::text(req.text),
            req.priority,
            deadline,
            now,
        )
        .await;
    match result {
        Ok(task_id) => (StatusCode::ACCEPTED, Json(SubmitResponse { task_id })).into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}

/// Blocks briefly for the task's terminal result; returns 202 if it has not
/// landed yet rather than holding the HTTP connection open to the deadline
/// (clients needing the full wait should use the WebSocket transport).
async fn get_result(State(state): State<AppState>, Path(id): Path<TaskId>) -> impl IntoResponse {
    let mut sub = state.bus.subscribe_correlation(id).await;
    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = sub.receiver.recv().await {
            if let MessagePayload::TaskResult(result) = message.payload {
                return Some(result);
            }
        }
        None
    })
    .await;

    state.bus.unsubscribe_correlation(id).await;
    match wait {
        Ok(Some(result)) => Json(result).into_response(),
        _ => StatusCode::ACCEPTED.into_response(),
    }
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot().await).into_response()
}

#[derive(Debug, Serialize)]
struct ProviderRow {
    id: String,
    stats: Option<conclave::services::provider_pool::ProviderStats>,
}

async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let mut rows = Vec::with_capacity(state.provider_ids.len());
    for id in state.provider_ids.iter() {
        rows.push(ProviderRow {
            id: id.clone(),
            stats: state.provider_pool.stats(id).await,
        });
    }
    Json(rows).into_response()
}

#[derive(Debug, Deserialize)]
struct RoutesQuery {
    limit: Option<usize>,
}

async fn list_routes(State(state): State<AppState>, Query(query): Query<RoutesQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    Json(state.audit.recent_routes(limit).await).into_response()
}

async fn disable_provider(headers: HeaderMap, State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED;
    }
    state.provider_pool.disable(&id).await;
    StatusCode::NO_CONTENT
}

async fn enable_provider(headers: HeaderMap, State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED;
    }
    state.provider_pool.enable(&id).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ConfigureProviderRequest {
    field: String,
    value: String,
}

/// Hot-updates a single provider field, read-modify-write against the
/// current config so unrelated fields are left untouched.
async fn configure_provider(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfigureProviderRequest>,
) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(mut cfg) = state.provider_pool.get_config(&id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match cfg.apply_field(&req.field, &req.value) {
        Ok(()) => {
            state.provider_pool.configure(id, cfg, Utc::now()).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
    }
}

async fn deregister_agent(headers: HeaderMap, State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED;
    }
    match state.registry.deregister(id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}
