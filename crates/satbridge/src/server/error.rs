use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use satbridge_core::CoreError;

// ==============================================================================
// Error Type
// ==============================================================================

#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        if err.is_not_found() {
            return Self::NotFound(err.to_string());
        }
        if err.is_connectivity() {
            tracing::warn!(error = %err, "node unreachable while serving request");
            return Self::Unavailable(err.to_string());
        }
        match err {
            CoreError::InvalidBlockRef(_)
            | CoreError::InvalidTxData(_)
            | CoreError::InvalidDescriptor { .. }
            | CoreError::DeriveAddress { .. } => Self::BadRequest(err.to_string()),
            CoreError::Rpc(_) | CoreError::AddressInfo { .. } => {
                tracing::warn!(error = %err, "node rejected request");
                Self::BadGateway(err.to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                Self::Internal(other.to_string())
            }
        }
    }
}
