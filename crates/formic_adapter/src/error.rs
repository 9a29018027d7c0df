#![forbid(unsafe_code)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use formic_engines::identity_provider::ProviderError;
use formic_storage::StorageError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    AuthProvider(#[from] ProviderError),
    #[error("storage failure: {0}")]
    Backend(#[from] StorageError),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl AdapterError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthProvider(_) | Self::Backend(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub reason: String,
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
            self.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                status: "error".to_string(),
                reason,
            }),
        )
            .into_response()
    }
}
