use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::storage::StorageError;

/// Structured error type for the HTTP handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 500 - A required query parameter (`id`, `place`) is absent or empty.
    MissingParameter(&'static str),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - The multipart body could not be parsed.
    InvalidForm(String),
    /// 413 - The upload exceeded the configured body ceiling.
    PayloadTooLarge,
    /// 404 - Generic not-found.
    NotFound,
    /// 500 - Writing to workspace storage failed.
    StorageFailed(String),
    /// 500 - Building the download archive failed.
    PackFailed(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidForm(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::StorageFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::PackFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingParameter(_) => "missing_parameter",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidForm(_) => "invalid_form",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::NotFound => "not_found",
            ApiError::StorageFailed(_) => "storage_failed",
            ApiError::PackFailed(_) => "pack_failed",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::MissingParameter(name) => format!("Missing query parameter: {}.", name),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidForm(detail) => format!("Unable to parse form: {}.", detail),
            ApiError::PayloadTooLarge => "Upload exceeds the size limit.".to_string(),
            ApiError::NotFound => "Not found.".to_string(),
            ApiError::StorageFailed(detail) => format!("Storage error: {}.", detail),
            ApiError::PackFailed(detail) => format!("Could not build archive: {}.", detail),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.code(), "{}", self.message());
        } else {
            tracing::warn!(code = self.code(), "{}", self.message());
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
