//! Activation Key Server - Main Application Entry Point
//!
//! A licensing trust core: client applications exchange signed activation
//! requests for signed answers, while operators manage activation codes and
//! API keys through an authenticated admin surface.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: PostgreSQL with sqlx, or an in-process store when no database is configured
//! - **Client trust**: HMAC-SHA256 over request and response fields with a shared secret
//! - **Operator trust**: API keys with SHA-256 hashed secrets and per-key permissions
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open storage (database pool plus migrations, or memory)
//! 3. Optionally create the first admin key
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

mod config;
mod crypto;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod store;

use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

use crate::{
    state::AppState,
    store::{memory::MemoryStore, postgres::PgStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let state = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            AppState::new(Arc::new(PgStore::new(pool)), &config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage; data is lost on exit");
            AppState::new(Arc::new(MemoryStore::new()), &config)
        }
    };

    if config.bootstrap_admin_key {
        match state.api_keys.bootstrap().await? {
            Some(full_key) => {
                tracing::warn!("No API keys found, created an admin key with every permission");
                // Printed once, never logged
                println!("Admin API key: {}", full_key);
            }
            None => tracing::info!("API keys already exist, skipping admin key bootstrap"),
        }
    }

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connect info feeds the caller address recorded in the audit log
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
