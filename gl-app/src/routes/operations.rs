use crate::config::MAX_DURATION_SECS;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use gl_core::{CoordinatorError, DiffPreview, NewOperation, OperationId, SessionId};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_REJECTION_REASON: &str = "User rejected";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposeRequest {
    session_id: String,
    kind: String,
    #[serde(default)]
    parameters: serde_json::Value,
    #[serde(default)]
    preview: Option<DiffPreview>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RejectRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchRequest {
    operation_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchRejectRequest {
    operation_ids: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/operations", post(propose_operation))
        .route("/api/v1/operations/approve", post(batch_approve_operations))
        .route("/api/v1/operations/reject", post(batch_reject_operations))
        .route("/api/v1/operations/execute", post(batch_execute_operations))
        .route("/api/v1/operations/{id}", get(get_operation))
        .route("/api/v1/operations/{id}/approve", post(approve_operation))
        .route("/api/v1/operations/{id}/reject", post(reject_operation))
        .route("/api/v1/operations/{id}/execute", post(execute_operation))
        .route(
            "/api/v1/sessions/{session_id}/operations",
            get(list_session_operations),
        )
        .route(
            "/api/v1/sessions/{session_id}/operations/pending",
            get(list_pending_operations),
        )
}

#[tracing::instrument(level = "info", skip_all)]
async fn propose_operation(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ProposeRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if req.session_id.trim().is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "session_id is required");
    }
    if req.kind.trim().is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "kind is required");
    }
    if let Some(timeout_secs) = req.timeout_secs {
        if timeout_secs > MAX_DURATION_SECS {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("timeout_secs must be at most {MAX_DURATION_SECS}"),
            );
        }
    }

    // Stage file kinds proposed without a preview so reviewers always see
    // the concrete diff; a proposal that cannot be staged is never queued.
    let (parameters, preview) = match req.preview {
        Some(preview) => (req.parameters, Some(preview)),
        None if state.mutator.supports(&req.kind) => {
            match state.mutator.stage(&req.kind, &req.parameters).await {
                Ok(staged) => (staged.parameters, Some(staged.preview)),
                Err(e) => {
                    return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
                }
            }
        }
        None => (req.parameters, None),
    };

    let mut new_op = NewOperation::new(req.session_id, req.kind, parameters);
    if let Some(preview) = preview {
        new_op = new_op.with_preview(preview);
    }
    if let Some(timeout_secs) = req.timeout_secs {
        new_op = new_op.with_timeout(chrono::Duration::seconds(timeout_secs as i64));
    }

    match state.store.add(new_op) {
        Ok(op) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "operation": op })),
        ),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_operation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.get(&OperationId::new(id)) {
        Some(op) => (
            StatusCode::OK,
            Json(serde_json::json!({ "operation": op })),
        ),
        None => not_found_response(),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn approve_operation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let id = OperationId::new(id);
    if state.store.get(&id).is_none() {
        return not_found_response();
    }
    let approved = state.store.approve(&id);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "approved": approved })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn reject_operation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let id = OperationId::new(id);
    if state.store.get(&id).is_none() {
        return not_found_response();
    }
    let reason = rejection_reason(body.and_then(|Json(req)| req.reason));
    let rejected = state.store.reject(&id, Some(reason));
    (
        StatusCode::OK,
        Json(serde_json::json!({ "rejected": rejected })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn execute_operation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.executor.execute(&OperationId::new(id)).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({ "report": report })),
        ),
        Err(CoordinatorError::NotFound(_)) => not_found_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn batch_approve_operations(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<serde_json::Value> {
    let ids = to_operation_ids(&req.operation_ids);
    let results = state.store.batch_approve(&ids);
    Json(serde_json::json!({ "results": results }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn batch_reject_operations(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<BatchRejectRequest>,
) -> Json<serde_json::Value> {
    let ids = to_operation_ids(&req.operation_ids);
    let reason = rejection_reason(req.reason);
    let results = state.store.batch_reject(&ids, Some(reason));
    Json(serde_json::json!({ "results": results }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn batch_execute_operations(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<serde_json::Value> {
    let ids = to_operation_ids(&req.operation_ids);
    let reports = state.executor.execute_batch(&ids).await;
    Json(serde_json::json!({ "reports": reports }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_session_operations(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let operations = state.store.list_recent(&SessionId::new(session_id));
    Json(serde_json::json!({ "operations": operations }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_pending_operations(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let operations = state.store.list_pending(&SessionId::new(session_id));
    Json(serde_json::json!({ "operations": operations }))
}

fn rejection_reason(explicit: Option<String>) -> String {
    match explicit {
        Some(reason) if !reason.trim().is_empty() => reason.trim().to_string(),
        _ => DEFAULT_REJECTION_REASON.to_string(),
    }
}

fn to_operation_ids(raw: &[String]) -> Vec<OperationId> {
    raw.iter().map(|id| OperationId::new(id.as_str())).collect()
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "status": "error", "error": error.into() })),
    )
}

fn not_found_response() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "status": "not_found" })),
    )
}
