use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use tally_core::RecordError;
use tally_store::StoreError;

/// Handler failures, each mapped to one status code with a short text body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("expected content type application/json")]
    UnsupportedMediaType,

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("malformed request body: {0}")]
    Malformed(String),

    #[error("metric not found")]
    NotFound,

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("failed to render page: {0}")]
    Render(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Record(_) | ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
