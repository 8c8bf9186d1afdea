//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Verify it through the API key service
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{
    error::AppError,
    models::permission::{Permission, PermissionSet},
    services::api_key_service::check_permission,
    state::AppState,
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the authenticated API key
    pub api_key_id: Uuid,

    /// Display name of the key
    pub name: String,

    /// Permissions held by the key at the time of the request
    pub permissions: PermissionSet,
}

impl AuthContext {
    /// Require `permission`, failing with 403 when the key lacks it.
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        check_permission(&self.permissions, permission).inspect_err(|_| {
            tracing::warn!(
                key_id = %self.api_key_id,
                permission = %permission,
                "Permission denied"
            );
        })
    }
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Split `<key>` into public and secret halves and verify both
/// 3. If valid: inject `AuthContext` into request, call next handler
/// 4. If not: return 401 Unauthorized error before any handler logic
///
/// # Headers
///
/// Expected header format:
/// ```text
/// Authorization: Bearer 3f9a...c1.77be...0d
/// ```
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidApiKey)?;

    let api_key = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AppError::InvalidApiKey)?;

    let key = state.api_keys.verify(api_key).await?;

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(AuthContext {
        api_key_id: key.id,
        name: key.name,
        permissions: key.permissions,
    });

    Ok(next.run(request).await)
}
