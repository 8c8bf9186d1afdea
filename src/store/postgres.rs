//! PostgreSQL storage backend.
//!
//! Status and permission columns are plain text; the row structs here convert
//! them into model enums at the boundary. Every code mutation runs in a
//! transaction that locks the code row with `SELECT ... FOR UPDATE`.

use super::{
    ActivationCodeStore, ApiKeyStore, AuditLogStore, MAX_CODE_ATTEMPTS, StatisticsStore, Storage,
    StoreError,
};
use crate::{
    db::DbPool,
    models::{
        activation_code::{
            ActivationCode, BindOutcome, CodeFilter, CodeStatus, DeviceBinding, NewCodeBatch,
        },
        api_key::{ApiKey, ApiKeyStats, KeyStatus, NewApiKey, UpdateApiKeyRequest},
        audit::{AuditLogEntry, NewAuditEntry},
        pagination::Pagination,
        permission::PermissionSet,
        statistics::{AppStatistics, DailyStats, StatsDelta},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgExecutor};
use std::collections::HashMap;
use uuid::Uuid;

const CODE_COLUMNS: &str = "id, code, app_id, status, max_devices, notes, created_at, \
                            expires_at, revoked_at, revoke_reason";

const KEY_COLUMNS: &str = "id, name, key_hash, key_prefix, secret, status, permissions, \
                           last_used_at, created_at, updated_at, revoked_at";

const AUDIT_COLUMNS: &str =
    "id, actor_key_id, action, resource, outcome, status_code, caller_address, created_at";

/// Effective status of a code row at `$now`.
const EFFECTIVE_STATUS: &str = "CASE WHEN status = 'active' AND expires_at IS NOT NULL \
                                AND expires_at <= $3 THEN 'expired' ELSE status END";

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct CodeRow {
    id: Uuid,
    code: String,
    app_id: String,
    status: String,
    max_devices: i32,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    revoke_reason: Option<String>,
}

impl CodeRow {
    fn into_code(self, bound_devices: Vec<DeviceBinding>) -> Result<ActivationCode, StoreError> {
        Ok(ActivationCode {
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            id: self.id,
            code: self.code,
            app_id: self.app_id,
            max_devices: self.max_devices,
            bound_devices,
            notes: self.notes,
            created_at: self.created_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            revoke_reason: self.revoke_reason,
        })
    }
}

#[derive(Debug, FromRow)]
struct BindingRow {
    code_id: Uuid,
    device_id: String,
    device_info: Option<serde_json::Value>,
    bound_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ApiKeyRow {
    id: Uuid,
    name: String,
    key_hash: String,
    key_prefix: String,
    secret: String,
    status: String,
    permissions: Vec<String>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        Ok(ApiKey {
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            permissions: PermissionSet::from_storage(&row.permissions)
                .map_err(StoreError::Corrupt)?,
            id: row.id,
            name: row.name,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            secret: row.secret,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    actor_key_id: Uuid,
    action: String,
    resource: String,
    outcome: String,
    status_code: i32,
    caller_address: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            outcome: row.outcome.parse().map_err(StoreError::Corrupt)?,
            id: row.id,
            actor_key_id: row.actor_key_id,
            action: row.action,
            resource: row.resource,
            status_code: row.status_code,
            caller_address: row.caller_address,
            created_at: row.created_at,
        })
    }
}

/// Map a unique violation to [`StoreError::Duplicate`].
fn duplicate_or(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
        _ => StoreError::Database(err),
    }
}

/// Load the bindings of the given codes, grouped by code id, oldest first.
async fn bindings_for<'e, E: PgExecutor<'e>>(
    executor: E,
    code_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<DeviceBinding>>, StoreError> {
    let rows = sqlx::query_as::<_, BindingRow>(
        r#"
        SELECT code_id, device_id, device_info, bound_at, last_seen_at
        FROM device_bindings
        WHERE code_id = ANY($1)
        ORDER BY bound_at, id
        "#,
    )
    .bind(code_ids)
    .fetch_all(executor)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<DeviceBinding>> = HashMap::new();
    for row in rows {
        grouped.entry(row.code_id).or_default().push(DeviceBinding {
            device_id: row.device_id,
            device_info: row.device_info,
            bound_at: row.bound_at,
            last_seen_at: row.last_seen_at,
        });
    }
    Ok(grouped)
}

fn attach_bindings(
    rows: Vec<CodeRow>,
    mut bindings: HashMap<Uuid, Vec<DeviceBinding>>,
) -> Result<Vec<ActivationCode>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let devices = bindings.remove(&row.id).unwrap_or_default();
            row.into_code(devices)
        })
        .collect()
}

#[async_trait]
impl ActivationCodeStore for PgStore {
    async fn generate(
        &self,
        batch: &NewCodeBatch,
        next_code: fn() -> String,
    ) -> Result<Vec<ActivationCode>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(batch.count as usize);

        for _ in 0..batch.count {
            let mut inserted = None;
            for _ in 0..MAX_CODE_ATTEMPTS {
                // A collision inserts nothing instead of aborting the transaction.
                let row = sqlx::query_as::<_, CodeRow>(&format!(
                    r#"
                    INSERT INTO activation_codes (code, app_id, max_devices, notes, expires_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (code) DO NOTHING
                    RETURNING {CODE_COLUMNS}
                    "#
                ))
                .bind(next_code())
                .bind(&batch.app_id)
                .bind(batch.max_devices)
                .bind(&batch.notes)
                .bind(batch.expires_at)
                .fetch_optional(&mut *tx)
                .await?;

                if row.is_some() {
                    inserted = row;
                    break;
                }
            }

            match inserted {
                Some(row) => created.push(row.into_code(Vec::new())?),
                None => {
                    tx.rollback().await?;
                    return Err(StoreError::CodeSpaceExhausted);
                }
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find(&self, code: &str) -> Result<Option<ActivationCode>, StoreError> {
        let row = sqlx::query_as::<_, CodeRow>(&format!(
            "SELECT {CODE_COLUMNS} FROM activation_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut bindings = bindings_for(&self.pool, &[row.id]).await?;
        let devices = bindings.remove(&row.id).unwrap_or_default();
        row.into_code(devices).map(Some)
    }

    async fn bind_device(
        &self,
        app_id: &str,
        code: &str,
        device_id: &str,
        device_info: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock the code row: concurrent binds of the same code queue here
        let row = sqlx::query_as::<_, CodeRow>(&format!(
            "SELECT {CODE_COLUMNS} FROM activation_codes WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(BindOutcome::NotFound);
        };
        if row.app_id != app_id {
            tx.rollback().await?;
            return Ok(BindOutcome::NotFound);
        }

        let status: CodeStatus = row.status.parse().map_err(StoreError::Corrupt)?;
        match status {
            CodeStatus::Revoked => {
                tx.rollback().await?;
                return Ok(BindOutcome::Revoked);
            }
            CodeStatus::Expired => {
                tx.rollback().await?;
                return Ok(BindOutcome::Expired);
            }
            CodeStatus::Active if row.expires_at.is_some_and(|deadline| deadline <= now) => {
                sqlx::query("UPDATE activation_codes SET status = 'expired' WHERE id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(BindOutcome::Expired);
            }
            CodeStatus::Active => {}
        }

        let refreshed = sqlx::query(
            r#"
            UPDATE device_bindings
            SET last_seen_at = $3
            WHERE code_id = $1 AND device_id = $2
            "#,
        )
        .bind(row.id)
        .bind(device_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let devices_used: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM device_bindings WHERE code_id = $1")
                .bind(row.id)
                .fetch_one(&mut *tx)
                .await?;

        if refreshed > 0 {
            tx.commit().await?;
            return Ok(BindOutcome::Bound {
                newly_bound: false,
                devices_used: devices_used as i32,
            });
        }

        if devices_used >= i64::from(row.max_devices) {
            tx.rollback().await?;
            return Ok(BindOutcome::DeviceLimitExceeded);
        }

        sqlx::query(
            r#"
            INSERT INTO device_bindings (code_id, device_id, device_info, bound_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(row.id)
        .bind(device_id)
        .bind(device_info)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(BindOutcome::Bound {
            newly_bound: true,
            devices_used: devices_used as i32 + 1,
        })
    }

    async fn revoke(
        &self,
        code: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<(ActivationCode, bool)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, CodeRow>(&format!(
            "SELECT {CODE_COLUMNS} FROM activation_codes WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let newly_revoked = row.status != CodeStatus::Revoked.as_str();
        let row = if newly_revoked {
            sqlx::query_as::<_, CodeRow>(&format!(
                r#"
                UPDATE activation_codes
                SET status = 'revoked', revoked_at = $2, revoke_reason = $3
                WHERE id = $1
                RETURNING {CODE_COLUMNS}
                "#
            ))
            .bind(row.id)
            .bind(now)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?
        } else {
            row
        };

        let mut bindings = bindings_for(&mut *tx, &[row.id]).await?;
        tx.commit().await?;

        let devices = bindings.remove(&row.id).unwrap_or_default();
        Ok(Some((row.into_code(devices)?, newly_revoked)))
    }

    async fn list(
        &self,
        filter: &CodeFilter,
        page: Pagination,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ActivationCode>, i64), StoreError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*) FROM activation_codes
            WHERE app_id = $1 AND ($2::text IS NULL OR {EFFECTIVE_STATUS} = $2)
            "#
        ))
        .bind(&filter.app_id)
        .bind(status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, CodeRow>(&format!(
            r#"
            SELECT {CODE_COLUMNS} FROM activation_codes
            WHERE app_id = $1 AND ($2::text IS NULL OR {EFFECTIVE_STATUS} = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&filter.app_id)
        .bind(status)
        .bind(now)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let bindings = bindings_for(&self.pool, &ids).await?;
        Ok((attach_bindings(rows, bindings)?, total))
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            INSERT INTO api_keys (name, key_hash, key_prefix, secret, permissions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.secret)
        .bind(key.permissions.to_storage())
        .fetch_one(&self.pool)
        .await
        .map_err(duplicate_or)?;

        row.try_into()
    }

    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = $1 AND status = 'active'"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?
        .map(ApiKey::try_from)
        .transpose()
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKeyRow>(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKey::try_from)
            .transpose()
    }

    async fn list_keys(
        &self,
        status: Option<KeyStatus>,
        page: Pagination,
    ) -> Result<(Vec<ApiKey>, i64), StoreError> {
        let status = status.map(|s| s.as_str());

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM api_keys WHERE ($1::text IS NULL OR status = $1)")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            SELECT {KEY_COLUMNS} FROM api_keys
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let keys = rows
            .into_iter()
            .map(ApiKey::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((keys, total))
    }

    async fn update_key(
        &self,
        id: Uuid,
        changes: &UpdateApiKeyRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            UPDATE api_keys
            SET name = COALESCE($2, name),
                permissions = COALESCE($3, permissions),
                status = COALESCE($4, status),
                updated_at = $5
            WHERE id = $1 AND status <> 'revoked'
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.permissions.as_ref().map(PermissionSet::to_storage))
        .bind(changes.status.map(|s| s.as_str()))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(ApiKey::try_from)
        .transpose()
    }

    async fn revoke_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKeyRow>(&format!(
            r#"
            UPDATE api_keys
            SET updated_at = CASE WHEN status = 'revoked' THEN updated_at ELSE $2 END,
                revoked_at = COALESCE(revoked_at, $2),
                status = 'revoked'
            WHERE id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(ApiKey::try_from)
        .transpose()
    }

    async fn touch_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn key_stats(&self) -> Result<ApiKeyStats, StoreError> {
        let (total, active, inactive, revoked): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'inactive'),
                COUNT(*) FILTER (WHERE status = 'revoked')
            FROM api_keys
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ApiKeyStats {
            total,
            active,
            inactive,
            revoked,
        })
    }
}

#[async_trait]
impl AuditLogStore for PgStore {
    async fn append(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, StoreError> {
        sqlx::query_as::<_, AuditRow>(&format!(
            r#"
            INSERT INTO admin_audit_logs
                (actor_key_id, action, resource, outcome, status_code, caller_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(entry.actor_key_id)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(entry.outcome.as_str())
        .bind(entry.status_code)
        .bind(&entry.caller_address)
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    async fn list_entries(
        &self,
        actor_key_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<(Vec<AuditLogEntry>, i64), StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM admin_audit_logs WHERE ($1::uuid IS NULL OR actor_key_id = $1)",
        )
        .bind(actor_key_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            r#"
            SELECT {AUDIT_COLUMNS} FROM admin_audit_logs
            WHERE ($1::uuid IS NULL OR actor_key_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(actor_key_id)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(AuditLogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total))
    }
}

#[async_trait]
impl StatisticsStore for PgStore {
    async fn apply(
        &self,
        app_id: &str,
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO app_statistics (
                app_id, total_activations, successful_verifications, failed_verifications,
                codes_generated, codes_revoked, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (app_id) DO UPDATE SET
                total_activations = app_statistics.total_activations + EXCLUDED.total_activations,
                successful_verifications =
                    app_statistics.successful_verifications + EXCLUDED.successful_verifications,
                failed_verifications =
                    app_statistics.failed_verifications + EXCLUDED.failed_verifications,
                codes_generated = app_statistics.codes_generated + EXCLUDED.codes_generated,
                codes_revoked = app_statistics.codes_revoked + EXCLUDED.codes_revoked,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(app_id)
        .bind(delta.new_devices)
        .bind(delta.successes)
        .bind(delta.failures)
        .bind(delta.codes_generated)
        .bind(delta.codes_revoked)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO daily_stats (
                app_id, day, verification_count, success_count, failure_count,
                new_devices, codes_generated, codes_revoked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (app_id, day) DO UPDATE SET
                verification_count = daily_stats.verification_count + EXCLUDED.verification_count,
                success_count = daily_stats.success_count + EXCLUDED.success_count,
                failure_count = daily_stats.failure_count + EXCLUDED.failure_count,
                new_devices = daily_stats.new_devices + EXCLUDED.new_devices,
                codes_generated = daily_stats.codes_generated + EXCLUDED.codes_generated,
                codes_revoked = daily_stats.codes_revoked + EXCLUDED.codes_revoked
            "#,
        )
        .bind(app_id)
        .bind(now.date_naive())
        .bind(delta.verifications)
        .bind(delta.successes)
        .bind(delta.failures)
        .bind(delta.new_devices)
        .bind(delta.codes_generated)
        .bind(delta.codes_revoked)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn app_statistics(&self, app_id: &str) -> Result<Option<AppStatistics>, StoreError> {
        let stats = sqlx::query_as::<_, AppStatistics>(
            r#"
            SELECT app_id, total_activations, successful_verifications, failed_verifications,
                   codes_generated, codes_revoked, updated_at
            FROM app_statistics
            WHERE app_id = $1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn all_app_statistics(&self) -> Result<Vec<AppStatistics>, StoreError> {
        let stats = sqlx::query_as::<_, AppStatistics>(
            r#"
            SELECT app_id, total_activations, successful_verifications, failed_verifications,
                   codes_generated, codes_revoked, updated_at
            FROM app_statistics
            ORDER BY app_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn daily(
        &self,
        app_id: Option<&str>,
        since: NaiveDate,
    ) -> Result<Vec<DailyStats>, StoreError> {
        let rows = sqlx::query_as::<_, DailyStats>(
            r#"
            SELECT app_id, day, verification_count, success_count, failure_count,
                   new_devices, codes_generated, codes_revoked
            FROM daily_stats
            WHERE day >= $1 AND ($2::text IS NULL OR app_id = $2)
            ORDER BY day, app_id
            "#,
        )
        .bind(since)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Storage for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    //! These run against a live database:
    //! `DATABASE_URL=postgres://... cargo test -- --ignored`

    use super::*;
    use crate::{crypto::generate_activation_code, db};
    use std::sync::Arc;

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = db::create_pool(&url, 10).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        PgStore::new(pool)
    }

    fn batch(app_id: &str, max_devices: i32) -> NewCodeBatch {
        NewCodeBatch {
            app_id: app_id.to_string(),
            count: 1,
            max_devices,
            expires_at: None,
            notes: Some("integration".to_string()),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn concurrent_binds_respect_row_lock() {
        let store = Arc::new(store().await);
        let app_id = format!("it-{}", Uuid::new_v4());
        let code = store
            .generate(&batch(&app_id, 2), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let app_id = app_id.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store
                    .bind_device(&app_id, &code, &format!("device-{}", i), None, Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut bound = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), BindOutcome::Bound { .. }) {
                bound += 1;
            }
        }
        assert_eq!(bound, 2);
        assert_eq!(store.find(&code).await.unwrap().unwrap().devices_used(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn revoke_round_trip() {
        let store = store().await;
        let app_id = format!("it-{}", Uuid::new_v4());
        let code = store
            .generate(&batch(&app_id, 1), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;

        let (revoked, changed) = store
            .revoke(&code, Some("chargeback"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(changed);
        assert_eq!(revoked.status, CodeStatus::Revoked);

        let outcome = store
            .bind_device(&app_id, &code, "device", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, BindOutcome::Revoked);
    }
}
