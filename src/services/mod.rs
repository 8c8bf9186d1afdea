//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They validate input, talk to the store traits and emit statistics events.

/// Activation code generation, listing and revocation
pub mod activation_service;
/// API key issuing, verification and permission checks
pub mod api_key_service;
/// Administrative audit trail
pub mod audit_service;
/// Statistics aggregation and reporting
pub mod statistics_service;
/// Activation verification protocol
pub mod verifier;
