use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use dealflow_agent::Envelope;

use crate::auth;
use crate::error::ApiError;
use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

// GET /api/health: no auth required
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

// GET /api/emails?limit=50: requires Viewer+
pub async fn list_emails(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<serde_json::Value> {
    if !auth::has_viewer_access(&auth_result.role) {
        return Err(ApiError::forbidden());
    }
    let emails = state.service.list_emails(&auth_result.user_id, q.limit).await?;
    Ok(Json(serde_json::json!({ "emails": emails })))
}

// POST /api/emails/search: requires Operator+
pub async fn search_emails(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Envelope> {
    if !auth::has_operator_access(&auth_result.role) {
        return Err(ApiError::forbidden());
    }
    info!(user_id = %auth_result.user_id, "Email search triggered");
    let envelope = state
        .service
        .search_emails(&auth_result.user_id, state.shutdown.child_token())
        .await?;
    Ok(Json(envelope))
}

// POST /api/emails/{id}/analyze: requires Operator+
pub async fn analyze_email(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(email_id): Path<String>,
) -> ApiResult<Envelope> {
    if !auth::has_operator_access(&auth_result.role) {
        return Err(ApiError::forbidden());
    }
    info!(user_id = %auth_result.user_id, email_id = %email_id, "Email analysis triggered");
    let envelope = state
        .service
        .analyze_email(&auth_result.user_id, &email_id, state.shutdown.child_token())
        .await?;
    Ok(Json(envelope))
}

// PUT /api/profile: requires Operator+
pub async fn put_profile(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<serde_json::Value> {
    if !auth::has_operator_access(&auth_result.role) {
        return Err(ApiError::forbidden());
    }
    let row = state.service.upsert_profile(&auth_result.user_id, body).await?;
    Ok(Json(serde_json::Value::Object(row)))
}
