//! Shared types and error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::derive::DeriveError;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DeriveError> for ApiError {
    fn from(e: DeriveError) -> Self {
        match e {
            DeriveError::ModuleNotFound { .. } => ApiError::NotFound(e.to_string()),
            DeriveError::InvalidArguments(_) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_error_status() {
        let missing = ApiError::from(DeriveError::ModuleNotFound {
            candidates: vec!["elections".into()],
        });
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let decode = ApiError::from(DeriveError::Decode {
            path: "council.members".into(),
            message: "bad".into(),
        });
        assert_eq!(decode.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
