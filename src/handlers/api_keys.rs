//! API key management HTTP handlers.
//!
//! This module implements the admin key endpoints:
//! - POST /api/admin/api-keys - Create a key (raw key shown once)
//! - GET /api/admin/api-keys - List keys
//! - GET /api/admin/api-keys/stats - Key counts by status
//! - GET /api/admin/api-keys/{id} - Get one key
//! - PUT /api/admin/api-keys/{id} - Update name, permissions or status
//! - DELETE /api/admin/api-keys/{id} - Revoke a key
//!
//! Every response renders the secret half as `"***"` except creation.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        api_key::{
            ApiKeyResponse, ApiKeyStats, CreateApiKeyRequest, CreatedApiKeyResponse, KeyStatus,
            ListApiKeysQuery, ListApiKeysResponse, UpdateApiKeyRequest,
        },
        pagination::Pagination,
        permission::Permission,
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// Default page size for key listings.
const DEFAULT_KEY_LIMIT: u32 = 10;

/// Create a new API key.
///
/// # Endpoint
///
/// `POST /api/admin/api-keys`
///
/// # Authentication
///
/// Requires an API key with `apikeys:generate`.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Billing backend",
///   "permissions": ["codes:generate", "codes:read"]
/// }
/// ```
///
/// Without `permissions` the key gets `statistics:read` and `logs:read`.
/// Unknown permission names are rejected with 400.
///
/// # Response
///
/// - **Success (201 Created)**: The key plus `full_key`
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "name": "Billing backend",
///   "key_prefix": "3f9a01bc...",
///   "secret": "***",
///   "status": "active",
///   "permissions": ["codes:generate", "codes:read"],
///   "full_key": "3f9a01bc...e4.77be...0d"
/// }
/// ```
///
/// # Security Note
///
/// `full_key` is never shown again. Store it immediately.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), AppError> {
    auth.require(Permission::GenerateApiKeys)?;
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let (key, full_key) = state
        .api_keys
        .generate(&request.name, request.permissions)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            key: key.into(),
            full_key,
        }),
    ))
}

/// List API keys, newest first.
///
/// # Endpoint
///
/// `GET /api/admin/api-keys?status=active&page=1&limit=10`
///
/// `limit` defaults to 10 and is clamped to 1..=100.
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    query: Result<Query<ListApiKeysQuery>, QueryRejection>,
) -> Result<Json<ListApiKeysResponse>, AppError> {
    auth.require(Permission::ListApiKeys)?;
    let Query(query) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let status = query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<KeyStatus>())
        .transpose()
        .map_err(AppError::InvalidRequest)?;
    let page = Pagination::from_query(query.page, query.limit, DEFAULT_KEY_LIMIT);

    let (keys, total) = state.api_keys.list(status, page).await?;

    Ok(Json(ListApiKeysResponse {
        data: keys.into_iter().map(ApiKeyResponse::from).collect(),
        total,
        page: page.page,
        limit: page.limit,
    }))
}

/// Key counts by status.
///
/// # Endpoint
///
/// `GET /api/admin/api-keys/stats`
pub async fn api_key_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ApiKeyStats>, AppError> {
    auth.require(Permission::ApiKeyStats)?;
    Ok(Json(state.api_keys.stats().await?))
}

/// `GET /api/admin/api-keys/{id}`
pub async fn get_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    auth.require(Permission::ReadApiKeys)?;
    let Path(id) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.api_keys.get(id).await?.into()))
}

/// Update a key.
///
/// # Endpoint
///
/// `PUT /api/admin/api-keys/{id}`
///
/// # Request Body
///
/// Any of `name`, `permissions`, `status` (`active` or `inactive`).
///
/// # Response
///
/// - **Success (200 OK)**: The updated key
/// - **Error (404)**: Unknown key
/// - **Error (409)**: The key is revoked
pub async fn update_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateApiKeyRequest>, JsonRejection>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    auth.require(Permission::UpdateApiKeys)?;
    let Path(id) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let Json(changes) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    Ok(Json(state.api_keys.update(id, changes).await?.into()))
}

/// Revoke a key. Keys are never deleted; the record stays with status `revoked`.
///
/// # Endpoint
///
/// `DELETE /api/admin/api-keys/{id}`
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    auth.require(Permission::RevokeApiKeys)?;
    let Path(id) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    state.api_keys.revoke(id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "API key revoked"
    })))
}
