//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Checks the caller's permission and calls a service
//! 3. Returns HTTP response (JSON, status code)

/// Activation code endpoints
pub mod activation;
/// API key management endpoints
pub mod api_keys;
/// Audit log endpoint
pub mod audit;
/// Health check endpoints
pub mod health;
/// Statistics endpoints
pub mod statistics;
