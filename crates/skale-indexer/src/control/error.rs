use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use skale_common::IndexerError;

/// Failure of a control request, rendered as `{"error", "code"}`
#[derive(Debug)]
pub struct ApiError(pub IndexerError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<IndexerError> for ApiError {
    fn from(err: IndexerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = status.as_u16(), "Control request failed: {}", self.0);
        } else {
            tracing::debug!(code = status.as_u16(), "Control request rejected: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
