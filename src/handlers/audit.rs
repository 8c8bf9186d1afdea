//! Audit log HTTP handler.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        audit::{ListAuditLogsQuery, ListAuditLogsResponse},
        pagination::Pagination,
        permission::Permission,
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
};

const DEFAULT_LOG_LIMIT: u32 = 20;

/// List audit entries, newest first.
///
/// # Endpoint
///
/// `GET /api/admin/audit/logs?actor_key_id=...&page=1&limit=20`
///
/// # Authentication
///
/// Requires an API key with `logs:read`.
///
/// # Response
///
/// ```json
/// {
///   "data": [
///     {
///       "id": "9b2e4f0a-5d7c-4e61-8a3b-2c1d0e9f8a7b",
///       "actor_key_id": "550e8400-e29b-41d4-a716-446655440000",
///       "action": "DELETE /api/admin/api-keys/{id}",
///       "resource": "/api/admin/api-keys/660e8400-e29b-41d4-a716-446655440001",
///       "outcome": "success",
///       "status_code": 200,
///       "caller_address": "203.0.113.7",
///       "created_at": "2026-01-14T10:00:00Z"
///     }
///   ],
///   "total": 1,
///   "page": 1,
///   "limit": 20
/// }
/// ```
pub async fn list_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    query: Result<Query<ListAuditLogsQuery>, QueryRejection>,
) -> Result<Json<ListAuditLogsResponse>, AppError> {
    auth.require(Permission::ReadLogs)?;
    let Query(query) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let page = Pagination::from_query(query.page, query.limit, DEFAULT_LOG_LIMIT);
    let (data, total) = state.audit.list(query.actor_key_id, page).await?;

    Ok(Json(ListAuditLogsResponse {
        data,
        total,
        page: page.page,
        limit: page.limit,
    }))
}
