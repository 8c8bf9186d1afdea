//! Activation code HTTP handlers.
//!
//! This module implements the activation endpoints:
//! - POST /api/activation/verify - Redeem a code from a client (public, signed)
//! - POST /api/activation/generate - Generate a batch of codes
//! - GET /api/activation/list - List the codes of an app
//! - POST /api/activation/{code}/revoke - Revoke a code

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        activation_code::{
            CodeFilter, CodeItem, CodeResponse, CodeStatus, GenerateCodesRequest,
            GenerateCodesResponse, ListCodesQuery, ListCodesResponse, RevokeCodeRequest,
        },
        pagination::Pagination,
        permission::Permission,
        verification::{ReasonCode, VerificationRequest, VerificationResponse},
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{Value, json};

/// Default page size for code listings.
const DEFAULT_CODE_LIMIT: u32 = 20;

/// Verify an activation code for a device.
///
/// # Endpoint
///
/// `POST /api/activation/verify`
///
/// # Authentication
///
/// None. The request is authenticated by its HMAC signature instead.
///
/// # Response
///
/// Always a `VerificationResponse`; the HTTP status follows the reason code:
///
/// - **200**: `OK`
/// - **400**: `INVALID_REQUEST`, `TIMESTAMP_INVALID`
/// - **401**: `SIGNATURE_INVALID`, `CODE_NOT_FOUND`, `CODE_REVOKED`, `CODE_EXPIRED`
/// - **429**: `DEVICE_LIMIT_EXCEEDED`
/// - **500**: `INTERNAL_ERROR`
///
/// ```json
/// {
///   "success": true,
///   "code": "OK",
///   "message": "Activation code verified",
///   "data": {
///     "app_id": "com.example.reader",
///     "device_id": "a81f0c2e",
///     "devices_used": 1,
///     "max_devices": 3,
///     "remaining_devices": 2,
///     "expires_at": null
///   },
///   "timestamp": 1735689600123,
///   "signature": "5be1..."
/// }
/// ```
pub async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerificationRequest>, JsonRejection>,
) -> (StatusCode, Json<VerificationResponse>) {
    let response = match payload {
        Ok(Json(request)) => state.verifier.verify(&request).await,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Malformed verification request");
            VerificationResponse::rejected(ReasonCode::InvalidRequest)
        }
    };

    (response.status_code(), Json(response))
}

/// Generate activation codes.
///
/// # Endpoint
///
/// `POST /api/activation/generate`
///
/// # Authentication
///
/// Requires an API key with `codes:generate`.
///
/// # Request Body
///
/// ```json
/// {
///   "app_id": "com.example.reader",
///   "count": 2,
///   "max_devices": 3,
///   "expires_in_days": 30
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: The new codes
/// - **Error (400)**: Invalid body or parameters
/// - **Error (401)**: Invalid API key
/// - **Error (403)**: Missing `codes:generate`
///
/// ```json
/// {
///   "success": true,
///   "generated": 2,
///   "codes": [
///     { "code": "K7QM-2XWD-PR4H-9TNA", "expires_at": "2026-01-14T10:00:00Z" },
///     { "code": "B3ZC-VE8L-Y6GF-JS5U", "expires_at": "2026-01-14T10:00:00Z" }
///   ]
/// }
/// ```
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<GenerateCodesRequest>, JsonRejection>,
) -> Result<Json<GenerateCodesResponse>, AppError> {
    auth.require(Permission::GenerateCodes)?;
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let codes = state.activation.generate(request, Utc::now()).await?;

    Ok(Json(GenerateCodesResponse {
        success: true,
        generated: codes.len(),
        codes: codes
            .into_iter()
            .map(|c| CodeItem {
                code: c.code,
                expires_at: c.expires_at,
            })
            .collect(),
    }))
}

/// List the codes of one app.
///
/// # Endpoint
///
/// `GET /api/activation/list?app_id=...&status=active&page=1&limit=20`
///
/// # Authentication
///
/// Requires an API key with `codes:read`.
///
/// # Query Parameters
///
/// - `app_id` (required)
/// - `status`: `active`, `revoked` or `expired` (effective status)
/// - `page`: 1-indexed, defaults to 1
/// - `limit`: defaults to 20, clamped to 1..=100
///
/// # Ordering
///
/// Newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    query: Result<Query<ListCodesQuery>, QueryRejection>,
) -> Result<Json<ListCodesResponse>, AppError> {
    auth.require(Permission::ReadCodes)?;
    let Query(query) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let app_id = query
        .app_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("app_id is required".to_string()))?;
    let status = query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<CodeStatus>())
        .transpose()
        .map_err(AppError::InvalidRequest)?;
    let page = Pagination::from_query(query.page, query.limit, DEFAULT_CODE_LIMIT);

    let now = Utc::now();
    let (codes, total) = state
        .activation
        .list(&CodeFilter { app_id, status }, page, now)
        .await?;

    Ok(Json(ListCodesResponse {
        success: true,
        total,
        page: page.page,
        limit: page.limit,
        items: codes.into_iter().map(|c| CodeResponse::at(c, now)).collect(),
    }))
}

/// Revoke an activation code.
///
/// # Endpoint
///
/// `POST /api/activation/{code}/revoke`
///
/// # Authentication
///
/// Requires an API key with `codes:revoke`.
///
/// # Request Body
///
/// Optional: `{ "reason": "refund" }`
///
/// # Response
///
/// - **Success (200 OK)**: `{ "success": true, "message": "Activation code revoked" }`
/// - **Error (404)**: Unknown code
///
/// Revoking an already revoked code also succeeds.
pub async fn revoke(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    auth.require(Permission::RevokeCodes)?;
    let Path(code) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RevokeCodeRequest::default()
    } else {
        serde_json::from_slice::<RevokeCodeRequest>(&body)
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?
    };

    state
        .activation
        .revoke(&code, request.reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Activation code revoked"
    })))
}
