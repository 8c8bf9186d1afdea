//! API Key model for authentication.
//!
//! API keys authenticate administrative callers. A raw key is a compound
//! `<public>.<secret>` string; the database keeps the SHA-256 hash of the public
//! component for lookup, and the secret component is redacted on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::permission::PermissionSet;

/// Separator between the public and secret components of a raw key.
pub const KEY_SEPARATOR: char = '.';

/// Placeholder rendered instead of the secret component.
pub const REDACTED: &str = "***";

/// Lifecycle state of an API key. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Inactive,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Inactive => "inactive",
            KeyStatus::Revoked => "revoked",
        }
    }

    /// Whether an update may move a key from `self` to `next`.
    ///
    /// Nothing leaves `Revoked`, not even a no-op update.
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        !matches!(self, KeyStatus::Revoked) && next != KeyStatus::Revoked
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "inactive" => Ok(KeyStatus::Inactive),
            "revoked" => Ok(KeyStatus::Revoked),
            _ => Err(format!("Unknown key status: {}", s)),
        }
    }
}

/// Represents an API key record.
///
/// # Database Table
///
/// Maps to the `api_keys` table. `permissions` is stored as a sorted `TEXT[]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub id: Uuid,

    /// Display name chosen by the administrator
    pub name: String,

    /// SHA-256 hash of the public component (64 hex characters)
    pub key_hash: String,

    /// First characters of the public component, for recognising a key in lists
    pub key_prefix: String,

    /// Secret component. Never rendered after creation.
    pub secret: String,

    pub status: KeyStatus,
    pub permissions: PermissionSet,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Fields for inserting a new key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub secret: String,
    pub permissions: PermissionSet,
}

/// Partial update applied to a key. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKeyRequest {
    pub name: Option<String>,
    pub permissions: Option<PermissionSet>,
    pub status: Option<KeyStatus>,
}

/// Request body for creating a key.
///
/// ```json
/// {
///   "name": "Billing backend",
///   "permissions": ["codes:generate", "codes:read"]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub permissions: Option<PermissionSet>,
}

/// Query string for listing keys.
#[derive(Debug, Deserialize)]
pub struct ListApiKeysQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Key as rendered to API clients.
///
/// `secret` is always the redaction placeholder and `key_hash` is never included.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub secret: &'static str,
    pub status: KeyStatus,
    pub permissions: PermissionSet,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key_prefix: key.key_prefix,
            secret: REDACTED,
            status: key.status,
            permissions: key.permissions,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
            revoked_at: key.revoked_at,
        }
    }
}

/// Response for key creation: the only place the raw key ever appears.
#[derive(Debug, Serialize)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub key: ApiKeyResponse,
    pub full_key: String,
}

/// Response body for listing keys.
#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub data: Vec<ApiKeyResponse>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Key counts by status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub revoked: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_is_terminal() {
        assert!(!KeyStatus::Revoked.can_transition_to(KeyStatus::Active));
        assert!(!KeyStatus::Revoked.can_transition_to(KeyStatus::Inactive));
        assert!(!KeyStatus::Revoked.can_transition_to(KeyStatus::Revoked));
        assert!(KeyStatus::Active.can_transition_to(KeyStatus::Inactive));
        assert!(KeyStatus::Inactive.can_transition_to(KeyStatus::Active));
        assert!(KeyStatus::Active.can_transition_to(KeyStatus::Active));
    }

    #[test]
    fn response_redacts_secret_and_hash() {
        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: "ops".to_string(),
            key_hash: "f".repeat(64),
            key_prefix: "abcd1234...".to_string(),
            secret: "very-secret-component".to_string(),
            status: KeyStatus::Active,
            permissions: PermissionSet::default_grant(),
            last_used_at: None,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        };

        let json = serde_json::to_value(ApiKeyResponse::from(key)).unwrap();
        assert_eq!(json["secret"], REDACTED);
        assert!(json.get("key_hash").is_none());
        assert!(!json.to_string().contains("very-secret-component"));
    }
}
