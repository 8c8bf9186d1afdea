//! API key service: issuing, verifying and managing administrative keys.
//!
//! # Key Format
//!
//! A raw key is `<public>.<secret>`, each half 32 random bytes hex encoded.
//! Only the SHA-256 of the public half is indexed. The secret half is compared
//! by digest, so neither half is ever compared in its raw form.
//!
//! # Security
//!
//! - The raw key is returned once, by [`ApiKeyService::generate`]
//! - Unknown, inactive, revoked and wrong-secret keys fail identically
//! - Revocation takes effect on the next request; nothing is cached

use crate::{
    crypto,
    error::AppError,
    models::{
        api_key::{ApiKey, ApiKeyStats, KEY_SEPARATOR, KeyStatus, NewApiKey, UpdateApiKeyRequest},
        pagination::Pagination,
        permission::{Permission, PermissionSet},
    },
    store::ApiKeyStore,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Characters of the public half shown in `key_prefix`.
const PREFIX_LEN: usize = 8;

/// Name given to the key created on an empty store at startup.
const BOOTSTRAP_KEY_NAME: &str = "Admin Key";

pub struct ApiKeyService {
    store: Arc<dyn ApiKeyStore>,
}

/// Require `permission` from a key's permission set.
///
/// # Errors
///
/// `Forbidden` (403) naming the missing permission. This is distinct from the
/// 401 returned for an invalid key.
pub fn check_permission(
    permissions: &PermissionSet,
    permission: Permission,
) -> Result<(), AppError> {
    if permissions.contains(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(permission.to_string()))
    }
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn ApiKeyStore>) -> Self {
        Self { store }
    }

    /// Create a key and return it with the raw key.
    ///
    /// # Process
    ///
    /// 1. Validate the name
    /// 2. Draw the public and secret halves
    /// 3. Store the public-half hash, display prefix and secret
    /// 4. Return the record and `<public>.<secret>` (only time it's shown)
    ///
    /// A missing or empty permission list grants `statistics:read` and `logs:read`.
    pub async fn generate(
        &self,
        name: &str,
        permissions: Option<PermissionSet>,
    ) -> Result<(ApiKey, String), AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidRequest("name is required".to_string()));
        }

        let permissions = permissions
            .filter(|p| !p.is_empty())
            .unwrap_or_else(PermissionSet::default_grant);

        let public = crypto::random_token::<32>();
        let secret = crypto::random_token::<32>();

        let key = self
            .store
            .insert_key(&NewApiKey {
                name: name.to_string(),
                key_hash: crypto::hash_secret(&public),
                key_prefix: format!("{}...", &public[..PREFIX_LEN]),
                secret: secret.clone(),
                permissions,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "insert_key", name = %name, error = %e, "Store call failed");
            })?;

        tracing::info!(key_id = %key.id, name = %key.name, "API key created");

        Ok((key, format!("{}{}{}", public, KEY_SEPARATOR, secret)))
    }

    /// Resolve a presented raw key to an active key record.
    ///
    /// On success `last_used_at` is stamped; a failure to stamp is logged and
    /// does not fail the request.
    ///
    /// # Errors
    ///
    /// `InvalidApiKey` for every kind of mismatch.
    pub async fn verify(&self, presented: &str) -> Result<ApiKey, AppError> {
        let mut parts = presented.split(KEY_SEPARATOR);
        let (Some(public), Some(secret), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AppError::InvalidApiKey);
        };
        if public.is_empty() || secret.is_empty() {
            return Err(AppError::InvalidApiKey);
        }

        let Some(mut key) = self
            .store
            .find_active_by_hash(&crypto::hash_secret(public))
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "find_key", error = %e, "Store call failed");
            })?
        else {
            tracing::debug!("API key rejected: unknown or inactive");
            return Err(AppError::InvalidApiKey);
        };

        if crypto::hash_secret(secret) != crypto::hash_secret(&key.secret) {
            tracing::warn!(key_id = %key.id, "API key rejected: secret mismatch");
            return Err(AppError::InvalidApiKey);
        }

        let now = Utc::now();
        match self.store.touch_key(key.id, now).await {
            Ok(()) => key.last_used_at = Some(now),
            Err(e) => tracing::warn!(key_id = %key.id, error = %e, "Failed to stamp last_used_at"),
        }

        Ok(key)
    }

    pub async fn get(&self, id: Uuid) -> Result<ApiKey, AppError> {
        self.store
            .get_key(id)
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "get_key", key_id = %id, error = %e, "Store call failed");
            })?
            .ok_or(AppError::ApiKeyNotFound)
    }

    pub async fn list(
        &self,
        status: Option<KeyStatus>,
        page: Pagination,
    ) -> Result<(Vec<ApiKey>, i64), AppError> {
        let listed = self.store.list_keys(status, page).await.inspect_err(|e| {
            tracing::error!(operation = "list_keys", error = %e, "Store call failed");
        })?;
        Ok(listed)
    }

    /// Change a key's name, permissions or status.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: empty name, or status `revoked` (use revoke instead)
    /// - `ApiKeyNotFound`: no such key
    /// - `Conflict`: the key is revoked
    pub async fn update(&self, id: Uuid, changes: UpdateApiKeyRequest) -> Result<ApiKey, AppError> {
        if changes.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::InvalidRequest("name must not be empty".to_string()));
        }
        if changes.status == Some(KeyStatus::Revoked) {
            return Err(AppError::InvalidRequest(
                "status must be active or inactive; revoke the key instead".to_string(),
            ));
        }

        let current = self.get(id).await?;
        if !current
            .status
            .can_transition_to(changes.status.unwrap_or(current.status))
        {
            return Err(AppError::Conflict("API key is revoked".to_string()));
        }

        let changes = UpdateApiKeyRequest {
            name: changes.name.map(|n| n.trim().to_string()),
            ..changes
        };

        // None here means the key was revoked after the read above.
        let key = self
            .store
            .update_key(id, &changes, Utc::now())
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "update_key", key_id = %id, error = %e, "Store call failed");
            })?
            .ok_or_else(|| AppError::Conflict("API key is revoked".to_string()))?;

        tracing::info!(key_id = %key.id, status = %key.status, "API key updated");
        Ok(key)
    }

    /// Revoke a key. Revoking twice is harmless.
    pub async fn revoke(&self, id: Uuid) -> Result<ApiKey, AppError> {
        let key = self
            .store
            .revoke_key(id, Utc::now())
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "revoke_key", key_id = %id, error = %e, "Store call failed");
            })?
            .ok_or(AppError::ApiKeyNotFound)?;

        tracing::info!(key_id = %key.id, "API key revoked");
        Ok(key)
    }

    pub async fn stats(&self) -> Result<ApiKeyStats, AppError> {
        let stats = self.store.key_stats().await.inspect_err(|e| {
            tracing::error!(operation = "key_stats", error = %e, "Store call failed");
        })?;
        Ok(stats)
    }

    /// Create an all-permission admin key if no key exists yet.
    ///
    /// Returns the raw key when one was created.
    pub async fn bootstrap(&self) -> Result<Option<String>, AppError> {
        if self.stats().await?.total > 0 {
            return Ok(None);
        }

        let (_, raw_key) = self
            .generate(BOOTSTRAP_KEY_NAME, Some(PermissionSet::all()))
            .await?;
        Ok(Some(raw_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn service() -> ApiKeyService {
        ApiKeyService::new(Arc::new(MemoryStore::new()))
    }

    fn codes_only() -> PermissionSet {
        [Permission::GenerateCodes, Permission::ReadCodes]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn generated_key_verifies() {
        let service = service();
        let (key, raw) = service.generate("Billing", Some(codes_only())).await.unwrap();

        let (public, secret) = raw.split_once('.').unwrap();
        assert_eq!(public.len(), 64);
        assert_eq!(secret.len(), 64);
        assert_eq!(key.key_prefix, format!("{}...", &public[..8]));
        assert_eq!(key.key_hash, crypto::hash_secret(public));

        let verified = service.verify(&raw).await.unwrap();
        assert_eq!(verified.id, key.id);
        assert!(verified.last_used_at.is_some());
        assert!(service.get(key.id).await.unwrap().last_used_at.is_some());
    }

    #[tokio::test]
    async fn default_permissions_apply() {
        let service = service();
        let (key, _) = service.generate("Reporting", None).await.unwrap();
        assert_eq!(key.permissions, PermissionSet::default_grant());

        let (key, _) = service
            .generate("Reporting", Some(PermissionSet::new()))
            .await
            .unwrap();
        assert_eq!(key.permissions, PermissionSet::default_grant());
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let err = service().generate("   ", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn every_mismatch_is_the_same_error() {
        let service = service();
        let (key, raw) = service.generate("Ops", None).await.unwrap();
        let (public, _) = raw.split_once('.').unwrap();

        let wrong_secret = format!("{}.{}", public, "0".repeat(64));
        let unknown = format!("{}.{}", "f".repeat(64), "0".repeat(64));
        for presented in [
            "",
            "no-separator",
            "a.b.c",
            ".secret",
            "public.",
            wrong_secret.as_str(),
            unknown.as_str(),
        ] {
            assert!(
                matches!(service.verify(presented).await, Err(AppError::InvalidApiKey)),
                "{presented:?} should be rejected"
            );
        }

        service.revoke(key.id).await.unwrap();
        assert!(matches!(service.verify(&raw).await, Err(AppError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn inactive_key_is_rejected_until_reactivated() {
        let service = service();
        let (key, raw) = service.generate("Ops", None).await.unwrap();

        service
            .update(
                key.id,
                UpdateApiKeyRequest {
                    status: Some(KeyStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(service.verify(&raw).await, Err(AppError::InvalidApiKey)));

        service
            .update(
                key.id,
                UpdateApiKeyRequest {
                    status: Some(KeyStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(service.verify(&raw).await.is_ok());
    }

    #[tokio::test]
    async fn revoked_key_cannot_be_updated() {
        let service = service();
        let (key, _) = service.generate("Ops", None).await.unwrap();
        let revoked = service.revoke(key.id).await.unwrap();
        assert_eq!(revoked.status, KeyStatus::Revoked);
        assert!(revoked.revoked_at.is_some());

        let err = service
            .update(
                key.id,
                UpdateApiKeyRequest {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let again = service.revoke(key.id).await.unwrap();
        assert_eq!(again.revoked_at, revoked.revoked_at);
    }

    #[tokio::test]
    async fn update_rejects_revoked_status_and_unknown_ids() {
        let service = service();
        let (key, _) = service.generate("Ops", None).await.unwrap();
        let err = service
            .update(
                key.id,
                UpdateApiKeyRequest {
                    status: Some(KeyStatus::Revoked),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let err = service
            .update(Uuid::new_v4(), UpdateApiKeyRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ApiKeyNotFound));
    }

    #[tokio::test]
    async fn permission_check_is_forbidden_not_unauthorized() {
        let permissions = codes_only();
        assert!(check_permission(&permissions, Permission::GenerateCodes).is_ok());
        assert!(matches!(
            check_permission(&permissions, Permission::RevokeCodes),
            Err(AppError::Forbidden(p)) if p == "codes:revoke"
        ));
    }

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let service = service();
        let raw = service.bootstrap().await.unwrap().unwrap();
        let admin = service.verify(&raw).await.unwrap();
        assert_eq!(admin.permissions, PermissionSet::all());
        assert_eq!(admin.name, "Admin Key");

        assert!(service.bootstrap().await.unwrap().is_none());
        assert_eq!(service.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let service = service();
        let (a, _) = service.generate("a", None).await.unwrap();
        service.generate("b", None).await.unwrap();
        let (c, _) = service.generate("c", None).await.unwrap();
        service.revoke(a.id).await.unwrap();
        service
            .update(
                c.id,
                UpdateApiKeyRequest {
                    status: Some(KeyStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(
            stats,
            ApiKeyStats {
                total: 3,
                active: 1,
                inactive: 1,
                revoked: 1,
            }
        );
    }
}
