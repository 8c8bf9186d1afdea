//! Verification request/response types.
//!
//! A client signs `app_id`, `code`, `device_id` and `timestamp` with the shared
//! secret built into the trusted client. The server answers with a stable reason
//! code that integrations can branch on.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification request body.
///
/// # JSON Example
///
/// ```json
/// {
///   "app_id": "com.example.reader",
///   "code": "ABCD-EFGH-JKLM-NPQR",
///   "device_id": "a81f0c2e",
///   "device_info": { "model": "OPPO A57", "os_version": "13" },
///   "timestamp": 1735689600000,
///   "signature": "9c1f..."
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationRequest {
    pub app_id: String,
    pub code: String,
    pub device_id: String,
    #[serde(default)]
    pub device_info: Option<serde_json::Value>,
    /// Client time in unix milliseconds
    pub timestamp: i64,
    /// Hex HMAC-SHA256 over [`VerificationRequest::canonical_string`]
    pub signature: String,
}

impl VerificationRequest {
    /// The exact string covered by the request signature.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.app_id, self.code, self.device_id, self.timestamp
        )
    }
}

/// Stable reason codes returned by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    InvalidRequest,
    SignatureInvalid,
    TimestampInvalid,
    CodeNotFound,
    CodeRevoked,
    CodeExpired,
    DeviceLimitExceeded,
    InternalError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::InvalidRequest => "INVALID_REQUEST",
            ReasonCode::SignatureInvalid => "SIGNATURE_INVALID",
            ReasonCode::TimestampInvalid => "TIMESTAMP_INVALID",
            ReasonCode::CodeNotFound => "CODE_NOT_FOUND",
            ReasonCode::CodeRevoked => "CODE_REVOKED",
            ReasonCode::CodeExpired => "CODE_EXPIRED",
            ReasonCode::DeviceLimitExceeded => "DEVICE_LIMIT_EXCEEDED",
            ReasonCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this outcome.
    ///
    /// - `OK` → 200
    /// - `DEVICE_LIMIT_EXCEEDED` → 429
    /// - `TIMESTAMP_INVALID`, `INVALID_REQUEST` → 400
    /// - `INTERNAL_ERROR` → 500
    /// - everything else → 401
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReasonCode::Ok => StatusCode::OK,
            ReasonCode::DeviceLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ReasonCode::TimestampInvalid | ReasonCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ReasonCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "Activation code verified",
            ReasonCode::InvalidRequest => "Invalid request parameters",
            ReasonCode::SignatureInvalid => "Request signature is invalid",
            ReasonCode::TimestampInvalid => "Request timestamp is outside the allowed window",
            ReasonCode::CodeNotFound => "Activation code not found",
            ReasonCode::CodeRevoked => "Activation code has been revoked",
            ReasonCode::CodeExpired => "Activation code has expired",
            ReasonCode::DeviceLimitExceeded => "Device limit reached for this activation code",
            ReasonCode::InternalError => "Internal server error",
        }
    }
}

/// Details returned with a successful verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationData {
    pub app_id: String,
    pub device_id: String,
    pub devices_used: i32,
    pub max_devices: i32,
    pub remaining_devices: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Verification response body.
///
/// Never carries the shared secret or data about other codes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResponse {
    pub success: bool,
    pub code: ReasonCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VerificationData>,
    /// Server time (unix ms) covered by `signature`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Hex HMAC-SHA256 over [`VerificationResponse::canonical_string`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl VerificationResponse {
    pub fn rejected(code: ReasonCode) -> Self {
        Self {
            success: false,
            code,
            message: code.default_message().to_string(),
            data: None,
            timestamp: None,
            signature: None,
        }
    }

    pub fn accepted(data: VerificationData) -> Self {
        Self {
            success: true,
            code: ReasonCode::Ok,
            message: ReasonCode::Ok.default_message().to_string(),
            data: Some(data),
            timestamp: None,
            signature: None,
        }
    }

    /// String covered by the response signature: the normalized activation
    /// code, app id, device id and server timestamp.
    pub fn canonical_string(code: &str, app_id: &str, device_id: &str, timestamp: i64) -> String {
        format!("{}\n{}\n{}\n{}", code, app_id, device_id, timestamp)
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }
}
