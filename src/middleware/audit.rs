//! Audit middleware.
//!
//! Runs inside authentication, after the handler, and records one entry per
//! authenticated request with the final status code. Requests rejected by
//! authentication never get here and are not audited.

use crate::{
    middleware::auth::AuthContext,
    models::audit::{AuditOutcome, NewAuditEntry},
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Record the request in the audit log once the response is known.
///
/// The action is the method plus the route template
/// (`"PUT /api/admin/api-keys/{id}"`); the resource is the concrete path.
pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let actor = request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.api_key_id);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let action = format!("{} {}", request.method(), route);
    let resource = request.uri().path().to_string();
    let caller_address = caller_address(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    let response = next.run(request).await;

    if let Some(actor_key_id) = actor {
        let status = response.status().as_u16();
        state.audit.record(NewAuditEntry {
            actor_key_id,
            action,
            resource,
            outcome: AuditOutcome::from_status(status),
            status_code: i32::from(status),
            caller_address,
        });
    }

    response
}

/// First `X-Forwarded-For` hop, else the socket peer, else `"unknown"`.
fn caller_address(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(caller_address(&headers, Some(&peer)), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        let peer = ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 4000)));
        assert_eq!(caller_address(&headers, Some(&peer)), "192.168.1.9");
        assert_eq!(caller_address(&headers, None), "unknown");
    }
}
