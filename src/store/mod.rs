//! Storage traits and backends.
//!
//! Services depend on the traits here, never on a concrete backend:
//! - [`postgres::PgStore`]: PostgreSQL via sqlx, used in production
//! - [`memory::MemoryStore`]: process-local maps, used without `DATABASE_URL` and in tests
//!
//! Every method that mutates an activation code is atomic for that code.

pub mod memory;
pub mod postgres;

use crate::models::{
    activation_code::{ActivationCode, BindOutcome, CodeFilter, NewCodeBatch},
    api_key::{ApiKey, ApiKeyStats, KeyStatus, NewApiKey, UpdateApiKeyRequest},
    audit::{AuditLogEntry, NewAuditEntry},
    pagination::Pagination,
    statistics::{AppStatistics, DailyStats, StatsDelta},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Candidates tried for each code of a batch before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 8;

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique column already holds the value.
    #[error("already exists")]
    Duplicate,

    /// Every candidate for a new code collided with an existing one.
    #[error("no unused activation code found after {MAX_CODE_ATTEMPTS} attempts")]
    CodeSpaceExhausted,

    /// A stored value could not be mapped back to a model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Activation codes and their device bindings.
#[async_trait]
pub trait ActivationCodeStore: Send + Sync {
    /// Insert `batch.count` new codes drawn from `next_code`.
    ///
    /// A collision retries with a fresh candidate up to [`MAX_CODE_ATTEMPTS`]
    /// times; after that the whole batch is discarded and
    /// [`StoreError::CodeSpaceExhausted`] is returned.
    async fn generate(
        &self,
        batch: &NewCodeBatch,
        next_code: fn() -> String,
    ) -> Result<Vec<ActivationCode>, StoreError>;

    /// Look up a code in stored (normalized) form.
    async fn find(&self, code: &str) -> Result<Option<ActivationCode>, StoreError>;

    /// Bind `device_id` to `code` if the code is usable and has room.
    ///
    /// The status check, count check and insert happen as one atomic step per
    /// code, so concurrent calls can never push a code past `max_devices`.
    /// A code owned by another app is reported as `NotFound`. A code whose
    /// deadline has passed is stamped `expired` and reported as `Expired`.
    async fn bind_device(
        &self,
        app_id: &str,
        code: &str,
        device_id: &str,
        device_info: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError>;

    /// Revoke a code. Returns the code and whether this call changed it,
    /// or `None` if the code does not exist.
    ///
    /// Re-revoking keeps the first `revoked_at` and reason.
    async fn revoke(
        &self,
        code: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<(ActivationCode, bool)>, StoreError>;

    /// Codes of one app, newest first, filtered by effective status at `now`.
    async fn list(
        &self,
        filter: &CodeFilter,
        page: Pagination,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ActivationCode>, i64), StoreError>;
}

/// API key records.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Insert a key. Fails with [`StoreError::Duplicate`] if `key_hash` exists.
    async fn insert_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError>;

    /// Active key with the given public-component hash.
    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError>;

    /// Keys newest first, optionally filtered by status.
    async fn list_keys(
        &self,
        status: Option<KeyStatus>,
        page: Pagination,
    ) -> Result<(Vec<ApiKey>, i64), StoreError>;

    /// Apply a partial update to a key that is not revoked.
    ///
    /// Returns `None` when no such key exists or it is revoked.
    async fn update_key(
        &self,
        id: Uuid,
        changes: &UpdateApiKeyRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError>;

    /// Mark a key revoked. The first `revoked_at` is kept on repeat calls.
    async fn revoke_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ApiKey>, StoreError>;

    async fn touch_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn key_stats(&self) -> Result<ApiKeyStats, StoreError>;
}

/// Append-only administrative audit trail.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, StoreError>;

    /// Entries newest first, optionally for one actor.
    async fn list_entries(
        &self,
        actor_key_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<(Vec<AuditLogEntry>, i64), StoreError>;
}

/// Aggregated reporting counters.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Add `delta` to the app's lifetime counters and to its row for `now`'s day.
    async fn apply(
        &self,
        app_id: &str,
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn app_statistics(&self, app_id: &str) -> Result<Option<AppStatistics>, StoreError>;

    async fn all_app_statistics(&self) -> Result<Vec<AppStatistics>, StoreError>;

    /// Daily rows on or after `since`, oldest first. `None` means every app.
    async fn daily(
        &self,
        app_id: Option<&str>,
        since: NaiveDate,
    ) -> Result<Vec<DailyStats>, StoreError>;
}

/// A backend implementing every store.
#[async_trait]
pub trait Storage:
    ActivationCodeStore + ApiKeyStore + AuditLogStore + StatisticsStore + 'static
{
    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}
