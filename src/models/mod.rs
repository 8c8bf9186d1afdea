//! Data models representing stored records and API bodies.

/// Activation codes and device bindings
pub mod activation_code;
/// API key authentication model
pub mod api_key;
/// Administrative audit trail
pub mod audit;
/// Offset pagination
pub mod pagination;
/// Permission names and sets
pub mod permission;
/// Aggregated reporting counters
pub mod statistics;
/// Verification protocol bodies and reason codes
pub mod verification;
