//! Audit log models.
//!
//! Every authenticated administrative request leaves one immutable entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How an audited request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    /// The key was valid but lacked the required permission.
    Denied,
    Failure,
}

impl AuditOutcome {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=399 => AuditOutcome::Success,
            403 => AuditOutcome::Denied,
            _ => AuditOutcome::Failure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "denied" => Ok(AuditOutcome::Denied),
            "failure" => Ok(AuditOutcome::Failure),
            _ => Err(format!("Unknown audit outcome: {}", s)),
        }
    }
}

/// A recorded administrative action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_key_id: Uuid,
    /// `"<METHOD> <route template>"`, e.g. `"DELETE /api/admin/api-keys/{id}"`
    pub action: String,
    /// Concrete request path
    pub resource: String,
    pub outcome: AuditOutcome,
    pub status_code: i32,
    pub caller_address: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the recorder; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_key_id: Uuid,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub status_code: i32,
    pub caller_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ListAuditLogsQuery {
    pub actor_key_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListAuditLogsResponse {
    pub data: Vec<AuditLogEntry>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_status() {
        assert_eq!(AuditOutcome::from_status(200), AuditOutcome::Success);
        assert_eq!(AuditOutcome::from_status(201), AuditOutcome::Success);
        assert_eq!(AuditOutcome::from_status(403), AuditOutcome::Denied);
        assert_eq!(AuditOutcome::from_status(404), AuditOutcome::Failure);
        assert_eq!(AuditOutcome::from_status(500), AuditOutcome::Failure);
    }
}
