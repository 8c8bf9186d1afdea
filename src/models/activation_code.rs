//! Activation code data models and API request/response types.
//!
//! This module defines:
//! - `ActivationCode`: a code plus the devices bound to it
//! - `CodeStatus`: the closed set of code states and their transitions
//! - Request/response bodies for the generate, list and revoke endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of an activation code.
///
/// `Revoked` and `Expired` are terminal: nothing moves a code back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Active,
    Revoked,
    Expired,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Active => "active",
            CodeStatus::Revoked => "revoked",
            CodeStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CodeStatus::Active),
            "revoked" => Ok(CodeStatus::Revoked),
            "expired" => Ok(CodeStatus::Expired),
            _ => Err(format!("Unknown code status: {}", s)),
        }
    }
}

/// A device bound to an activation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_id: String,

    /// Free-form description reported by the client (model, OS, app version).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<serde_json::Value>,

    pub bound_at: DateTime<Utc>,

    /// Last successful verification from this device.
    pub last_seen_at: DateTime<Utc>,
}

/// An activation code and its device bindings.
///
/// # Invariants
///
/// - `bound_devices.len() <= max_devices`
/// - once `status` leaves `Active` it never returns
/// - `bound_devices` only grows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationCode {
    pub id: Uuid,
    pub code: String,
    pub app_id: String,
    pub status: CodeStatus,
    pub max_devices: i32,
    pub bound_devices: Vec<DeviceBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl ActivationCode {
    /// Status after applying the expiry deadline at `now`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CodeStatus {
        match self.status {
            CodeStatus::Active if self.is_past_expiry(now) => CodeStatus::Expired,
            status => status,
        }
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    pub fn devices_used(&self) -> i32 {
        self.bound_devices.len() as i32
    }
}

/// Parameters for a batch of new codes.
#[derive(Debug, Clone)]
pub struct NewCodeBatch {
    pub app_id: String,
    pub count: u32,
    pub max_devices: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Filter for listing codes of one app.
#[derive(Debug, Clone)]
pub struct CodeFilter {
    pub app_id: String,
    pub status: Option<CodeStatus>,
}

/// Result of an attempt to bind a device to a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The device is bound. `newly_bound` is false when it already was.
    Bound { newly_bound: bool, devices_used: i32 },
    DeviceLimitExceeded,
    Revoked,
    Expired,
    NotFound,
}

/// Request body for generating codes.
///
/// # JSON Example
///
/// ```json
/// {
///   "app_id": "com.example.reader",
///   "count": 5,
///   "max_devices": 3,
///   "expires_in_days": 30,
///   "notes": "Spring promotion"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct GenerateCodesRequest {
    pub app_id: String,
    pub count: u32,

    /// Devices each code may be bound to (defaults to 1)
    #[serde(default = "default_max_devices", alias = "device_limit")]
    pub max_devices: i32,

    /// Days until the codes expire; never when absent
    pub expires_in_days: Option<u32>,

    pub notes: Option<String>,
}

fn default_max_devices() -> i32 {
    1
}

/// A generated code as returned to the caller.
#[derive(Debug, Serialize)]
pub struct CodeItem {
    pub code: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response body for code generation.
#[derive(Debug, Serialize)]
pub struct GenerateCodesResponse {
    pub success: bool,
    pub generated: usize,
    pub codes: Vec<CodeItem>,
}

/// Query string for listing codes.
#[derive(Debug, Deserialize)]
pub struct ListCodesQuery {
    pub app_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A code as rendered in list responses.
///
/// `status` is the effective status, so codes past their deadline show as
/// expired even before a verification attempt stamps them.
#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub id: Uuid,
    pub code: String,
    pub app_id: String,
    pub status: CodeStatus,
    pub max_devices: i32,
    pub devices_used: i32,
    pub devices: Vec<DeviceBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl CodeResponse {
    pub fn at(code: ActivationCode, now: DateTime<Utc>) -> Self {
        Self {
            status: code.effective_status(now),
            devices_used: code.devices_used(),
            id: code.id,
            code: code.code,
            app_id: code.app_id,
            max_devices: code.max_devices,
            devices: code.bound_devices,
            notes: code.notes,
            created_at: code.created_at,
            expires_at: code.expires_at,
            revoked_at: code.revoked_at,
            revoke_reason: code.revoke_reason,
        }
    }
}

/// Response body for listing codes.
#[derive(Debug, Serialize)]
pub struct ListCodesResponse {
    pub success: bool,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<CodeResponse>,
}

/// Optional body for revoking a code.
#[derive(Debug, Default, Deserialize)]
pub struct RevokeCodeRequest {
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code_expiring(expires_at: Option<DateTime<Utc>>) -> ActivationCode {
        ActivationCode {
            id: Uuid::new_v4(),
            code: "ABCD-EFGH-JKLM-NPQR".to_string(),
            app_id: "app".to_string(),
            status: CodeStatus::Active,
            max_devices: 2,
            bound_devices: Vec::new(),
            notes: None,
            created_at: Utc::now(),
            expires_at,
            revoked_at: None,
            revoke_reason: None,
        }
    }

    #[test]
    fn effective_status_applies_deadline() {
        let now = Utc::now();
        assert_eq!(code_expiring(None).effective_status(now), CodeStatus::Active);
        assert_eq!(
            code_expiring(Some(now + Duration::days(1))).effective_status(now),
            CodeStatus::Active
        );
        assert_eq!(
            code_expiring(Some(now - Duration::seconds(1))).effective_status(now),
            CodeStatus::Expired
        );

        let mut revoked = code_expiring(Some(now - Duration::days(1)));
        revoked.status = CodeStatus::Revoked;
        assert_eq!(revoked.effective_status(now), CodeStatus::Revoked);
    }

    #[test]
    fn generate_request_defaults_and_alias() {
        let req: GenerateCodesRequest =
            serde_json::from_str(r#"{"app_id":"a","count":2}"#).unwrap();
        assert_eq!(req.max_devices, 1);
        assert!(req.expires_in_days.is_none());

        let req: GenerateCodesRequest =
            serde_json::from_str(r#"{"app_id":"a","count":2,"device_limit":3}"#).unwrap();
        assert_eq!(req.max_devices, 3);
    }

    #[test]
    fn status_parses_round_trip() {
        for status in [CodeStatus::Active, CodeStatus::Revoked, CodeStatus::Expired] {
            assert_eq!(status.as_str().parse::<CodeStatus>(), Ok(status));
        }
        assert!("deleted".parse::<CodeStatus>().is_err());
    }
}
