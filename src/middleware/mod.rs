//! HTTP middleware components.
//!
//! Middleware are functions that run around route handlers.
//! They can:
//! - Authenticate requests
//! - Record what authenticated callers did
//! - Short-circuit requests (reject unauthorized)

/// Administrative audit recording
pub mod audit;
/// API key authentication middleware
pub mod auth;
