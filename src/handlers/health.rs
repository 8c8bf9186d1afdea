//! Health check endpoints for service monitoring.

use crate::{error::AppError, middleware::auth::AuthContext, state::AppState};
use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
///
/// Returns service status and storage connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Storage backend in use (`postgres` or `memory`)
    pub storage: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Endpoint
///
/// `GET /api/health` (public)
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "storage": "postgres",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (500 Internal Server Error)
///
/// If storage is unreachable, returns standard error response.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.storage.ping().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        storage: state.storage.backend_name().to_string(),
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct AdminHealthResponse {
    pub status: String,
    /// Name of the key that made the request
    pub key_name: String,
    pub timestamp: DateTime<Utc>,
}

/// `GET /api/admin/health`: confirms a key is valid. No permission needed.
pub async fn admin_health_check(
    Extension(auth): Extension<AuthContext>,
) -> Json<AdminHealthResponse> {
    Json(AdminHealthResponse {
        status: "ok".to_string(),
        key_name: auth.name,
        timestamp: Utc::now(),
    })
}
