//! Permissions carried by API keys.
//!
//! A permission is a named capability checked before an administrative action
//! runs. Keys hold a [`PermissionSet`]; at the storage boundary the set becomes a
//! sorted list of strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single administrative capability.
///
/// Variants are declared in the lexical order of their string names so the
/// derived ordering and the stored string ordering agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "apikeys:generate")]
    GenerateApiKeys,
    #[serde(rename = "apikeys:list")]
    ListApiKeys,
    #[serde(rename = "apikeys:read")]
    ReadApiKeys,
    #[serde(rename = "apikeys:revoke")]
    RevokeApiKeys,
    #[serde(rename = "apikeys:stats")]
    ApiKeyStats,
    #[serde(rename = "apikeys:update")]
    UpdateApiKeys,
    #[serde(rename = "codes:generate")]
    GenerateCodes,
    #[serde(rename = "codes:read")]
    ReadCodes,
    #[serde(rename = "codes:revoke")]
    RevokeCodes,
    #[serde(rename = "logs:read")]
    ReadLogs,
    #[serde(rename = "statistics:read")]
    ReadStatistics,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::GenerateApiKeys,
        Permission::ListApiKeys,
        Permission::ReadApiKeys,
        Permission::RevokeApiKeys,
        Permission::ApiKeyStats,
        Permission::UpdateApiKeys,
        Permission::GenerateCodes,
        Permission::ReadCodes,
        Permission::RevokeCodes,
        Permission::ReadLogs,
        Permission::ReadStatistics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::GenerateCodes => "codes:generate",
            Permission::ReadCodes => "codes:read",
            Permission::RevokeCodes => "codes:revoke",
            Permission::GenerateApiKeys => "apikeys:generate",
            Permission::ListApiKeys => "apikeys:list",
            Permission::ReadApiKeys => "apikeys:read",
            Permission::UpdateApiKeys => "apikeys:update",
            Permission::RevokeApiKeys => "apikeys:revoke",
            Permission::ApiKeyStats => "apikeys:stats",
            Permission::ReadStatistics => "statistics:read",
            Permission::ReadLogs => "logs:read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

/// Ordered set of permissions.
///
/// Serializes as a sorted JSON array of permission strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known permission.
    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Permissions granted to a key created without an explicit list.
    pub fn default_grant() -> Self {
        [Permission::ReadStatistics, Permission::ReadLogs]
            .into_iter()
            .collect()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        self.0.union(&other.0).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// Sorted string form used by the storage layer.
    pub fn to_storage(&self) -> Vec<String> {
        self.iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Parse the stored string list back into a set.
    pub fn from_storage<S: AsRef<str>>(values: &[S]) -> Result<Self, String> {
        values.iter().map(|v| v.as_ref().parse()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
