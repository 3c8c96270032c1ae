use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ml::ErrorResponse;

/// Failure classes of the training/prediction engine.
///
/// Every variant propagates to the immediate caller; nothing in the core
/// retries automatically. Retries, if wanted, are the caller's policy.
#[derive(Debug, Error)]
pub enum MlError {
    /// Malformed price history or request input. Raised before any work is
    /// queued so bad input never consumes a training slot.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Training slots and the backlog queue are both saturated.
    #[error("{0}")]
    Busy(String),

    /// The model fit or its held-out evaluation failed.
    #[error("training failed: {0}")]
    Training(String),

    /// Persisting or retrieving model artifacts failed.
    #[error("artifact storage failure: {0}")]
    ArtifactIo(String),

    /// Fingerprint, index record, group or item lookup miss.
    #[error("{0} not found")]
    NotFound(String),
}

impl MlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MlError::Validation(_) => StatusCode::BAD_REQUEST,
            MlError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            MlError::Training(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MlError::ArtifactIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MlError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for MlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
