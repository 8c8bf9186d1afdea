//! HTTP router assembly.

use crate::{handlers, middleware, state::AppState};
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the full application router.
///
/// # Layout
///
/// - Public: `GET /api/health`, `POST /api/activation/verify`
/// - Everything else requires `Authorization: Bearer <key>`. Authentication
///   runs first; the audit layer inside it records each authenticated request
///   after the handler has answered.
pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        // Activation code management
        .route(
            "/api/activation/generate",
            post(handlers::activation::generate),
        )
        .route("/api/activation/list", get(handlers::activation::list))
        .route(
            "/api/activation/{code}/revoke",
            post(handlers::activation::revoke),
        )
        // API key management
        .route(
            "/api/admin/api-keys",
            post(handlers::api_keys::create_api_key).get(handlers::api_keys::list_api_keys),
        )
        .route(
            "/api/admin/api-keys/stats",
            get(handlers::api_keys::api_key_stats),
        )
        .route(
            "/api/admin/api-keys/{id}",
            get(handlers::api_keys::get_api_key)
                .put(handlers::api_keys::update_api_key)
                .delete(handlers::api_keys::revoke_api_key),
        )
        // Statistics
        .route(
            "/api/admin/statistics",
            get(handlers::statistics::overview),
        )
        .route(
            "/api/admin/statistics/dashboard",
            get(handlers::statistics::dashboard),
        )
        .route(
            "/api/admin/statistics/apps/{app_id}",
            get(handlers::statistics::app_statistics),
        )
        .route(
            "/api/admin/statistics/apps/{app_id}/trends",
            get(handlers::statistics::trends),
        )
        // Audit trail
        .route("/api/admin/audit/logs", get(handlers::audit::list_logs))
        .route(
            "/api/admin/health",
            get(handlers::health::admin_health_check),
        )
        // The last layer added runs first: auth, then audit, then the handler
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::audit::audit_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/api/health", get(handlers::health::health_check))
        .route(
            "/api/activation/verify",
            post(handlers::activation::verify),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        crypto,
        models::{
            audit::{AuditLogEntry, AuditOutcome},
            pagination::Pagination,
            permission::Permission,
        },
        store::memory::MemoryStore,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "router-test-shared-secret";

    fn state() -> AppState {
        let config = Config {
            database_url: None,
            server_port: 0,
            signature_secret: SECRET.to_string(),
            timestamp_tolerance_secs: 300,
            database_max_connections: 1,
            bootstrap_admin_key: false,
        };
        AppState::new(Arc::new(MemoryStore::new()), &config)
    }

    async fn key_with(state: &AppState, permissions: &[Permission]) -> String {
        let (_, raw) = state
            .api_keys
            .generate("test", Some(permissions.iter().copied().collect()))
            .await
            .unwrap();
        raw
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        key: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        build_router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn verify_body(code: &str, device_id: &str) -> Value {
        let timestamp = Utc::now().timestamp_millis();
        let message = format!("{}\n{}\n{}\n{}", "app", code, device_id, timestamp);
        json!({
            "app_id": "app",
            "code": code,
            "device_id": device_id,
            "timestamp": timestamp,
            "signature": crypto::sign(SECRET.as_bytes(), &message),
        })
    }

    /// Wait for spawned audit writes to land.
    async fn audit_entries(state: &AppState, expected: usize) -> Vec<AuditLogEntry> {
        let page = Pagination::from_query(None, Some(100), 20);
        for _ in 0..100 {
            let (entries, _) = state.audit.list(None, page).await.unwrap();
            if entries.len() >= expected {
                return entries;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("audit entries never reached {}", expected);
    }

    #[tokio::test]
    async fn health_is_public() {
        let state = state();
        let response = send(&state, "GET", "/api/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn missing_or_bad_key_is_unauthorized() {
        let state = state();
        for key in [None, Some("garbage"), Some("abc.def")] {
            let response = send(&state, "GET", "/api/admin/health", key, None).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body = json_body(response).await;
            assert_eq!(body["code"], "invalid_api_key");
        }
    }

    #[tokio::test]
    async fn valid_key_without_permission_is_forbidden_and_audited() {
        let state = state();
        let key = key_with(&state, &[Permission::ReadStatistics]).await;

        let response = send(
            &state,
            "POST",
            "/api/activation/generate",
            Some(&key),
            Some(json!({ "app_id": "app", "count": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let entries = audit_entries(&state, 1).await;
        assert_eq!(entries[0].action, "POST /api/activation/generate");
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(entries[0].status_code, 403);
    }

    #[tokio::test]
    async fn generate_then_verify_over_http() {
        let state = state();
        let key = key_with(&state, &[Permission::GenerateCodes, Permission::ReadCodes]).await;

        let response = send(
            &state,
            "POST",
            "/api/activation/generate",
            Some(&key),
            Some(json!({ "app_id": "app", "count": 1, "device_limit": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["generated"], 1);
        let code = body["codes"][0]["code"].as_str().unwrap().to_string();

        let response = send(&state, "POST", "/api/activation/verify", None, Some(verify_body(&code, "d1"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["code"], "OK");
        assert_eq!(body["data"]["devices_used"], 1);
        assert_eq!(body["signature"].as_str().unwrap().len(), 64);

        let response = send(&state, "POST", "/api/activation/verify", None, Some(verify_body(&code, "d2"))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(response).await["code"], "DEVICE_LIMIT_EXCEEDED");

        let response = send(
            &state,
            "GET",
            "/api/activation/list?app_id=app&limit=500",
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["items"][0]["devices_used"], 1);
    }

    #[tokio::test]
    async fn verify_status_mapping() {
        let state = state();

        let mut tampered = verify_body("AAAA-BBBB-CCCC-DDDD", "d1");
        tampered["device_id"] = json!("d2");
        let response = send(&state, "POST", "/api/activation/verify", None, Some(tampered)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "SIGNATURE_INVALID");

        let response = send(
            &state,
            "POST",
            "/api/activation/verify",
            None,
            Some(verify_body("AAAA-BBBB-CCCC-DDDD", "d1")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "CODE_NOT_FOUND");

        let response = send(
            &state,
            "POST",
            "/api/activation/verify",
            None,
            Some(json!({ "app_id": "app" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn revoke_endpoint_blocks_verification() {
        let state = state();
        let key = key_with(&state, &[Permission::GenerateCodes, Permission::RevokeCodes]).await;

        let body = json_body(
            send(
                &state,
                "POST",
                "/api/activation/generate",
                Some(&key),
                Some(json!({ "app_id": "app", "count": 1, "max_devices": 5 })),
            )
            .await,
        )
        .await;
        let code = body["codes"][0]["code"].as_str().unwrap().to_string();

        let uri = format!("/api/activation/{}/revoke", code);
        let response = send(&state, "POST", &uri, Some(&key), Some(json!({ "reason": "refund" }))).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Without a body, and a second time
        let response = send(&state, "POST", &uri, Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&state, "POST", "/api/activation/verify", None, Some(verify_body(&code, "d1"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "CODE_REVOKED");

        let response = send(
            &state,
            "POST",
            "/api/activation/ZZZZ-ZZZZ-ZZZZ-ZZZZ/revoke",
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_key_lifecycle_over_http() {
        let state = state();
        let admin = key_with(&state, &Permission::ALL).await;

        let response = send(
            &state,
            "POST",
            "/api/admin/api-keys",
            Some(&admin),
            Some(json!({ "name": "Reporting" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let full_key = created["full_key"].as_str().unwrap().to_string();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["secret"], "***");
        assert_eq!(
            created["permissions"],
            json!(["logs:read", "statistics:read"])
        );

        let response = send(&state, "GET", &format!("/api/admin/api-keys/{}", id), Some(&admin), None).await;
        let fetched = json_body(response).await;
        assert_eq!(fetched["secret"], "***");
        assert!(fetched.get("full_key").is_none());
        assert!(fetched.get("key_hash").is_none());

        let response = send(&state, "GET", "/api/admin/statistics", Some(&full_key), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&state, "DELETE", &format!("/api/admin/api-keys/{}", id), Some(&admin), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&state, "GET", "/api/admin/statistics", Some(&full_key), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            &state,
            "PUT",
            &format!("/api/admin/api-keys/{}", id),
            Some(&admin),
            Some(json!({ "name": "Renamed" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&state, "GET", "/api/admin/api-keys/stats", Some(&admin), None).await;
        let stats = json_body(response).await;
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["revoked"], 1);
    }

    #[tokio::test]
    async fn unknown_permission_is_a_validation_error() {
        let state = state();
        let admin = key_with(&state, &[Permission::GenerateApiKeys]).await;

        let response = send(
            &state,
            "POST",
            "/api/admin/api-keys",
            Some(&admin),
            Some(json!({ "name": "x", "permissions": ["codes:delete"] })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn audit_log_records_route_templates() {
        let state = state();
        let admin = key_with(&state, &[Permission::ReadApiKeys, Permission::ReadLogs]).await;
        let missing = uuid::Uuid::new_v4();

        let response = send(
            &state,
            "GET",
            &format!("/api/admin/api-keys/{}", missing),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let entries = audit_entries(&state, 1).await;
        assert_eq!(entries[0].action, "GET /api/admin/api-keys/{id}");
        assert_eq!(entries[0].resource, format!("/api/admin/api-keys/{}", missing));
        assert_eq!(entries[0].outcome, AuditOutcome::Failure);

        let response = send(&state, "GET", "/api/admin/audit/logs", Some(&admin), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["total"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn unknown_app_statistics_is_not_found() {
        let state = state();
        let key = key_with(&state, &[Permission::ReadStatistics]).await;
        let response = send(&state, "GET", "/api/admin/statistics/apps/nope", Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &state,
            "GET",
            "/api/admin/statistics/apps/nope/trends?days=3",
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn malformed_query_and_path_use_the_error_body() {
        let state = state();
        let admin = key_with(&state, &Permission::ALL).await;

        for uri in [
            "/api/activation/list?app_id=app&limit=abc",
            "/api/admin/api-keys/not-a-uuid",
            "/api/admin/api-keys?page=first",
            "/api/admin/audit/logs?actor_key_id=nobody",
            "/api/admin/statistics/apps/app/trends?days=week",
        ] {
            let response = send(&state, "GET", uri, Some(&admin), None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json_body(response).await;
            assert_eq!(body["success"], false, "{}", uri);
            assert_eq!(body["code"], "invalid_request", "{}", uri);
        }

        let response = send(&state, "DELETE", "/api/admin/api-keys/42", Some(&admin), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");
    }

    #[tokio::test]
    async fn oversized_expiry_is_rejected() {
        let state = state();
        let key = key_with(&state, &[Permission::GenerateCodes]).await;

        let response = send(
            &state,
            "POST",
            "/api/activation/generate",
            Some(&key),
            Some(json!({ "app_id": "a", "count": 1, "expires_in_days": 200000000 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");
    }
}
