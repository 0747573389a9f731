use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use dealflow_core::error::DealflowError;

/// Failure envelope: `{detail, status}` with a matching HTTP code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Missing or invalid credentials")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Insufficient role for this operation")
    }
}

impl From<DealflowError> for ApiError {
    fn from(e: DealflowError) -> Self {
        let status = match &e {
            DealflowError::NotFound(_) => StatusCode::NOT_FOUND,
            DealflowError::UnboundInput(_) | DealflowError::ToolValidation(_) => {
                StatusCode::BAD_REQUEST
            }
            DealflowError::Backend(_) | DealflowError::BackendTimeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            DealflowError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, status = status.as_u16(), "Request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.detail,
            "status": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}
