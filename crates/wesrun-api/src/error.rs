//! API error types and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use wesrun_core::Error as CoreError;
use wesrun_flow::error::Error as FlowError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflict (already exists / CAS).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for upstream engine failures.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "ENGINE_ERROR", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<FlowError> for ApiError {
    fn from(value: FlowError) -> Self {
        match value {
            FlowError::NotFound { id } => Self::not_found(format!("analysis not found: {id}")),
            FlowError::DuplicateId { id } => {
                Self::conflict(format!("analysis already exists: {id}"))
            }
            FlowError::DuplicateName { name } => {
                Self::conflict(format!("an active analysis named '{name}' already exists"))
            }
            FlowError::Conflict { id, actual, .. } => {
                Self::conflict(format!("analysis {id} changed concurrently (now {actual})"))
            }
            FlowError::InvalidState { id, status } => {
                Self::conflict(format!("analysis {id} is already {status}"))
            }
            FlowError::Malformed { reason } => Self::bad_request(reason),
            FlowError::Engine { message, .. } => Self::bad_gateway(message),
            FlowError::Storage { message } => Self::internal(message),
            FlowError::Core(err) => err.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } => Self::bad_request(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wesrun_core::AnalysisId;
    use wesrun_flow::prelude::AnalysisStatus;

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = FlowError::NotFound {
            id: AnalysisId::generate(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn duplicate_name_maps_to_409() {
        let err: ApiError = FlowError::DuplicateName {
            name: "wgs-1".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_state_maps_to_409() {
        let err: ApiError = FlowError::InvalidState {
            id: AnalysisId::generate(),
            status: AnalysisStatus::Succeeded,
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.message().contains("SUCCEEDED"));
    }

    #[test]
    fn engine_error_maps_to_502() {
        let err: ApiError = FlowError::engine("engine unavailable").into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "ENGINE_ERROR");
    }

    #[test]
    fn error_body_serializes_camel_case() {
        let response = ApiError::bad_request("bad uri").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
