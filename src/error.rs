//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//!
//! Activation verification does not use these errors: its failures are part of
//! the protocol and are answered with a `VerificationResponse` reason code.

use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Storage Errors**: anything raised by a store backend
/// - **Authentication Errors**: missing, malformed or unknown API keys
/// - **Authorization Errors**: a valid key without the required permission
/// - **Resource Errors**: requested records not found
/// - **Validation Errors**: invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A store backend failed.
    ///
    /// Returns HTTP 500 and hides details from the client, except for
    /// uniqueness violations which surface as 409.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// API key is missing, malformed, unknown, inactive or revoked.
    ///
    /// All of these cases look the same to the caller. Returns HTTP 401.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The key is valid but does not hold the named permission.
    ///
    /// Returns HTTP 403.
    #[error("Missing permission: {0}")]
    Forbidden(String),

    /// Returns HTTP 404.
    #[error("Activation code not found")]
    ActivationCodeNotFound,

    /// Returns HTTP 404.
    #[error("API key not found")]
    ApiKeyNotFound,

    /// No statistics have been recorded for the app. Returns HTTP 404.
    #[error("No statistics for app")]
    StatisticsNotFound,

    /// The operation conflicts with the record's current state.
    ///
    /// Returns HTTP 409.
    #[error("{0}")]
    Conflict(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "success": false,
///   "code": "error_type",
///   "message": "Human-readable error message"
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidRequest` → 400 Bad Request
/// - `InvalidApiKey` → 401 Unauthorized
/// - `Forbidden` → 403 Forbidden
/// - `*NotFound` → 404 Not Found
/// - `Conflict`, `Storage(Duplicate)` → 409 Conflict
/// - `Storage` → 500 Internal Server Error (details are logged, not returned)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                "insufficient_permissions",
                self.to_string(),
            ),
            AppError::ActivationCodeNotFound => (
                StatusCode::NOT_FOUND,
                "activation_code_not_found",
                self.to_string(),
            ),
            AppError::ApiKeyNotFound => {
                (StatusCode::NOT_FOUND, "api_key_not_found", self.to_string())
            }
            AppError::StatisticsNotFound => (
                StatusCode::NOT_FOUND,
                "statistics_not_found",
                self.to_string(),
            ),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Storage(StoreError::Duplicate) => (
                StatusCode::CONFLICT,
                "conflict",
                "Resource already exists".to_string(),
            ),
            AppError::Storage(ref err) => {
                tracing::error!(error = %err, "Storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "code": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_and_forbidden_are_distinct() {
        let unauthorized = AppError::InvalidApiKey.into_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(unauthorized).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "invalid_api_key");

        let forbidden = AppError::Forbidden("codes:generate".into()).into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        let body = body_json(forbidden).await;
        assert_eq!(body["code"], "insufficient_permissions");
        assert_eq!(body["message"], "Missing permission: codes:generate");
    }

    #[tokio::test]
    async fn storage_details_are_hidden() {
        let response = AppError::Storage(StoreError::CodeSpaceExhausted).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn duplicate_maps_to_conflict() {
        let response = AppError::Storage(StoreError::Duplicate).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
