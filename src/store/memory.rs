//! In-memory storage backend.
//!
//! State lives in concurrent maps and is lost on restart. Per-code atomicity
//! comes from holding the map entry's write lock for the whole
//! check-then-write of a binding.

use super::{
    ActivationCodeStore, ApiKeyStore, AuditLogStore, MAX_CODE_ATTEMPTS, StatisticsStore, Storage,
    StoreError,
};
use crate::models::{
    activation_code::{ActivationCode, BindOutcome, CodeFilter, CodeStatus, DeviceBinding, NewCodeBatch},
    api_key::{ApiKey, ApiKeyStats, KeyStatus, NewApiKey, UpdateApiKeyRequest},
    audit::{AuditLogEntry, NewAuditEntry},
    pagination::Pagination,
    statistics::{AppStatistics, DailyStats, StatsDelta},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A stored value plus its insertion sequence, used to break `created_at` ties.
#[derive(Debug, Clone)]
struct Sequenced<T> {
    seq: u64,
    value: T,
}

#[derive(Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    codes: DashMap<String, Sequenced<ActivationCode>>,
    keys: DashMap<Uuid, Sequenced<ApiKey>>,
    key_hashes: DashMap<String, Uuid>,
    audit: RwLock<Vec<AuditLogEntry>>,
    app_stats: DashMap<String, AppStatistics>,
    daily_stats: DashMap<(String, NaiveDate), DailyStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// Sort newest first and cut out one page.
fn paginate<T: Clone>(
    mut rows: Vec<Sequenced<T>>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
    page: Pagination,
) -> (Vec<T>, i64) {
    rows.sort_by(|a, b| {
        created_at(&b.value)
            .cmp(&created_at(&a.value))
            .then(b.seq.cmp(&a.seq))
    });
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .map(|row| row.value)
        .collect();
    (items, total)
}

#[async_trait]
impl ActivationCodeStore for MemoryStore {
    async fn generate(
        &self,
        batch: &NewCodeBatch,
        next_code: fn() -> String,
    ) -> Result<Vec<ActivationCode>, StoreError> {
        let now = Utc::now();
        let mut created: Vec<ActivationCode> = Vec::with_capacity(batch.count as usize);

        for _ in 0..batch.count {
            let mut inserted = None;
            for _ in 0..MAX_CODE_ATTEMPTS {
                let candidate = next_code();
                if let Entry::Vacant(slot) = self.codes.entry(candidate.clone()) {
                    let code = ActivationCode {
                        id: Uuid::new_v4(),
                        code: candidate,
                        app_id: batch.app_id.clone(),
                        status: CodeStatus::Active,
                        max_devices: batch.max_devices,
                        bound_devices: Vec::new(),
                        notes: batch.notes.clone(),
                        created_at: now,
                        expires_at: batch.expires_at,
                        revoked_at: None,
                        revoke_reason: None,
                    };
                    slot.insert(Sequenced {
                        seq: self.next_seq(),
                        value: code.clone(),
                    });
                    inserted = Some(code);
                    break;
                }
            }

            match inserted {
                Some(code) => created.push(code),
                None => {
                    for code in &created {
                        self.codes.remove(&code.code);
                    }
                    return Err(StoreError::CodeSpaceExhausted);
                }
            }
        }

        Ok(created)
    }

    async fn find(&self, code: &str) -> Result<Option<ActivationCode>, StoreError> {
        Ok(self.codes.get(code).map(|entry| entry.value.clone()))
    }

    async fn bind_device(
        &self,
        app_id: &str,
        code: &str,
        device_id: &str,
        device_info: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError> {
        // Held until the end of the function: the entry is locked for the
        // whole check-then-write.
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(BindOutcome::NotFound);
        };
        let record = &mut entry.value;

        if record.app_id != app_id {
            return Ok(BindOutcome::NotFound);
        }
        match record.status {
            CodeStatus::Revoked => return Ok(BindOutcome::Revoked),
            CodeStatus::Expired => return Ok(BindOutcome::Expired),
            CodeStatus::Active if record.is_past_expiry(now) => {
                record.status = CodeStatus::Expired;
                return Ok(BindOutcome::Expired);
            }
            CodeStatus::Active => {}
        }

        if let Some(binding) = record
            .bound_devices
            .iter_mut()
            .find(|d| d.device_id == device_id)
        {
            binding.last_seen_at = now;
            return Ok(BindOutcome::Bound {
                newly_bound: false,
                devices_used: record.devices_used(),
            });
        }

        if record.devices_used() >= record.max_devices {
            return Ok(BindOutcome::DeviceLimitExceeded);
        }

        record.bound_devices.push(DeviceBinding {
            device_id: device_id.to_string(),
            device_info: device_info.cloned(),
            bound_at: now,
            last_seen_at: now,
        });
        Ok(BindOutcome::Bound {
            newly_bound: true,
            devices_used: record.devices_used(),
        })
    }

    async fn revoke(
        &self,
        code: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<(ActivationCode, bool)>, StoreError> {
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(None);
        };
        let record = &mut entry.value;

        let newly_revoked = record.status != CodeStatus::Revoked;
        if newly_revoked {
            record.status = CodeStatus::Revoked;
            record.revoked_at = Some(now);
            record.revoke_reason = reason.map(str::to_string);
        }
        Ok(Some((record.clone(), newly_revoked)))
    }

    async fn list(
        &self,
        filter: &CodeFilter,
        page: Pagination,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ActivationCode>, i64), StoreError> {
        let rows: Vec<_> = self
            .codes
            .iter()
            .filter(|entry| {
                let code = &entry.value;
                code.app_id == filter.app_id
                    && filter
                        .status
                        .is_none_or(|status| code.effective_status(now) == status)
            })
            .map(|entry| entry.value().clone())
            .collect();

        Ok(paginate(rows, |c: &ActivationCode| c.created_at, page))
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        match self.key_hashes.entry(key.key_hash.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let record = ApiKey {
            id,
            name: key.name.clone(),
            key_hash: key.key_hash.clone(),
            key_prefix: key.key_prefix.clone(),
            secret: key.secret.clone(),
            status: KeyStatus::Active,
            permissions: key.permissions.clone(),
            last_used_at: None,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        };
        self.keys.insert(
            id,
            Sequenced {
                seq: self.next_seq(),
                value: record.clone(),
            },
        );
        Ok(record)
    }

    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let Some(id) = self.key_hashes.get(key_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .keys
            .get(&id)
            .map(|entry| entry.value.clone())
            .filter(|key| key.status == KeyStatus::Active))
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.get(&id).map(|entry| entry.value.clone()))
    }

    async fn list_keys(
        &self,
        status: Option<KeyStatus>,
        page: Pagination,
    ) -> Result<(Vec<ApiKey>, i64), StoreError> {
        let rows: Vec<_> = self
            .keys
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.value.status == s))
            .map(|entry| entry.value().clone())
            .collect();

        Ok(paginate(rows, |k: &ApiKey| k.created_at, page))
    }

    async fn update_key(
        &self,
        id: Uuid,
        changes: &UpdateApiKeyRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let Some(mut entry) = self.keys.get_mut(&id) else {
            return Ok(None);
        };
        let key = &mut entry.value;
        if key.status == KeyStatus::Revoked {
            return Ok(None);
        }

        if let Some(name) = &changes.name {
            key.name = name.clone();
        }
        if let Some(permissions) = &changes.permissions {
            key.permissions = permissions.clone();
        }
        if let Some(status) = changes.status {
            key.status = status;
        }
        key.updated_at = now;
        Ok(Some(key.clone()))
    }

    async fn revoke_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ApiKey>, StoreError> {
        let Some(mut entry) = self.keys.get_mut(&id) else {
            return Ok(None);
        };
        let key = &mut entry.value;
        if key.status != KeyStatus::Revoked {
            key.status = KeyStatus::Revoked;
            key.revoked_at = Some(now);
            key.updated_at = now;
        }
        Ok(Some(key.clone()))
    }

    async fn touch_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut entry) = self.keys.get_mut(&id) {
            entry.value.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn key_stats(&self) -> Result<ApiKeyStats, StoreError> {
        let mut stats = ApiKeyStats::default();
        for entry in self.keys.iter() {
            stats.total += 1;
            match entry.value.status {
                KeyStatus::Active => stats.active += 1,
                KeyStatus::Inactive => stats.inactive += 1,
                KeyStatus::Revoked => stats.revoked += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl AuditLogStore for MemoryStore {
    async fn append(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, StoreError> {
        let record = AuditLogEntry {
            id: Uuid::new_v4(),
            actor_key_id: entry.actor_key_id,
            action: entry.action.clone(),
            resource: entry.resource.clone(),
            outcome: entry.outcome,
            status_code: entry.status_code,
            caller_address: entry.caller_address.clone(),
            created_at: now,
        };
        self.audit.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_entries(
        &self,
        actor_key_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<(Vec<AuditLogEntry>, i64), StoreError> {
        let log = self.audit.read().await;
        let matching: Vec<&AuditLogEntry> = log
            .iter()
            .rev()
            .filter(|e| actor_key_id.is_none_or(|actor| e.actor_key_id == actor))
            .collect();

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }
}

#[async_trait]
impl StatisticsStore for MemoryStore {
    async fn apply(
        &self,
        app_id: &str,
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.app_stats
            .entry(app_id.to_string())
            .or_insert_with(|| AppStatistics::empty(app_id, now))
            .apply(delta, now);

        let day = now.date_naive();
        self.daily_stats
            .entry((app_id.to_string(), day))
            .or_insert_with(|| DailyStats::empty(app_id, day))
            .apply(delta);
        Ok(())
    }

    async fn app_statistics(&self, app_id: &str) -> Result<Option<AppStatistics>, StoreError> {
        Ok(self.app_stats.get(app_id).map(|s| s.clone()))
    }

    async fn all_app_statistics(&self) -> Result<Vec<AppStatistics>, StoreError> {
        let mut all: Vec<AppStatistics> = self.app_stats.iter().map(|s| s.clone()).collect();
        all.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Ok(all)
    }

    async fn daily(
        &self,
        app_id: Option<&str>,
        since: NaiveDate,
    ) -> Result<Vec<DailyStats>, StoreError> {
        let mut rows: Vec<DailyStats> = self
            .daily_stats
            .iter()
            .filter(|row| row.day >= since && app_id.is_none_or(|app| row.app_id == app))
            .map(|row| row.clone())
            .collect();
        rows.sort_by(|a, b| a.day.cmp(&b.day).then_with(|| a.app_id.cmp(&b.app_id)));
        Ok(rows)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_activation_code;
    use chrono::Duration;
    use std::sync::Arc;

    fn batch(app_id: &str, count: u32, max_devices: i32) -> NewCodeBatch {
        NewCodeBatch {
            app_id: app_id.to_string(),
            count,
            max_devices,
            expires_at: None,
            notes: None,
        }
    }

    fn fixed_code() -> String {
        "AAAA-BBBB-CCCC-DDDD".to_string()
    }

    #[tokio::test]
    async fn generate_yields_distinct_codes() {
        let store = MemoryStore::new();
        let codes = store
            .generate(&batch("app", 50, 1), generate_activation_code)
            .await
            .unwrap();
        let unique: std::collections::HashSet<_> = codes.iter().map(|c| &c.code).collect();
        assert_eq!(unique.len(), 50);
        assert!(codes.iter().all(|c| c.status == CodeStatus::Active));
    }

    #[tokio::test]
    async fn exhausted_code_space_rolls_back_batch() {
        let store = MemoryStore::new();
        // The second code can only ever collide with the first.
        let err = store
            .generate(&batch("app", 2, 1), fixed_code)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CodeSpaceExhausted));
        assert!(store.find(&fixed_code()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn binding_respects_limit_and_is_idempotent() {
        let store = MemoryStore::new();
        let code = store
            .generate(&batch("app", 1, 2), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;
        let now = Utc::now();

        let first = store.bind_device("app", &code, "d1", None, now).await.unwrap();
        assert_eq!(first, BindOutcome::Bound { newly_bound: true, devices_used: 1 });

        let again = store.bind_device("app", &code, "d1", None, now).await.unwrap();
        assert_eq!(again, BindOutcome::Bound { newly_bound: false, devices_used: 1 });

        let second = store.bind_device("app", &code, "d2", None, now).await.unwrap();
        assert_eq!(second, BindOutcome::Bound { newly_bound: true, devices_used: 2 });

        let third = store.bind_device("app", &code, "d3", None, now).await.unwrap();
        assert_eq!(third, BindOutcome::DeviceLimitExceeded);

        let stored = store.find(&code).await.unwrap().unwrap();
        assert_eq!(stored.devices_used(), 2);
    }

    #[tokio::test]
    async fn binding_under_another_app_is_not_found() {
        let store = MemoryStore::new();
        let code = store
            .generate(&batch("app", 1, 1), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;
        let outcome = store
            .bind_device("other", &code, "d1", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, BindOutcome::NotFound);
    }

    #[tokio::test]
    async fn concurrent_binds_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new());
        let code = store
            .generate(&batch("app", 1, 3), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store
                    .bind_device("app", &code, &format!("device-{}", i), None, Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut bound = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                BindOutcome::Bound { newly_bound: true, .. } => bound += 1,
                BindOutcome::DeviceLimitExceeded => rejected += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(bound, 3);
        assert_eq!(rejected, 7);
        assert_eq!(store.find(&code).await.unwrap().unwrap().devices_used(), 3);
    }

    #[tokio::test]
    async fn expired_code_is_stamped_on_bind() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut new_batch = batch("app", 1, 1);
        new_batch.expires_at = Some(now - Duration::minutes(1));
        let code = store
            .generate(&new_batch, generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;

        let outcome = store.bind_device("app", &code, "d1", None, now).await.unwrap();
        assert_eq!(outcome, BindOutcome::Expired);
        let stored = store.find(&code).await.unwrap().unwrap();
        assert_eq!(stored.status, CodeStatus::Expired);
        assert!(stored.bound_devices.is_empty());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryStore::new();
        let code = store
            .generate(&batch("app", 1, 1), generate_activation_code)
            .await
            .unwrap()
            .remove(0)
            .code;
        let first_at = Utc::now();

        let (revoked, changed) = store
            .revoke(&code, Some("refund"), first_at)
            .await
            .unwrap()
            .unwrap();
        assert!(changed);
        assert_eq!(revoked.status, CodeStatus::Revoked);

        let (again, changed) = store
            .revoke(&code, Some("other"), first_at + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert!(!changed);
        assert_eq!(again.revoked_at, Some(first_at));
        assert_eq!(again.revoke_reason.as_deref(), Some("refund"));

        let outcome = store.bind_device("app", &code, "d1", None, Utc::now()).await.unwrap();
        assert_eq!(outcome, BindOutcome::Revoked);

        assert!(store.revoke("NOPE", None, first_at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_effective_status_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .generate(&batch("app", 3, 1), generate_activation_code)
            .await
            .unwrap();
        let mut expiring = batch("app", 1, 1);
        expiring.expires_at = Some(now - Duration::seconds(5));
        let expired = store
            .generate(&expiring, generate_activation_code)
            .await
            .unwrap()
            .remove(0);
        store
            .generate(&batch("other", 2, 1), generate_activation_code)
            .await
            .unwrap();

        let page = Pagination::from_query(None, None, 20);
        let all = CodeFilter { app_id: "app".into(), status: None };
        let (items, total) = store.list(&all, page, now).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(items[0].code, expired.code);

        let only_expired = CodeFilter {
            app_id: "app".into(),
            status: Some(CodeStatus::Expired),
        };
        let (items, total) = store.list(&only_expired, page, now).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].code, expired.code);

        let small = Pagination::from_query(Some(2), Some(3), 20);
        let (items, total) = store.list(&all, small, now).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_key_hash_is_rejected() {
        let store = MemoryStore::new();
        let key = NewApiKey {
            name: "a".into(),
            key_hash: "h".repeat(64),
            key_prefix: "abcdefgh...".into(),
            secret: "s".into(),
            permissions: Default::default(),
        };
        store.insert_key(&key).await.unwrap();
        assert!(matches!(
            store.insert_key(&key).await.unwrap_err(),
            StoreError::Duplicate
        ));
    }

    #[tokio::test]
    async fn statistics_accumulate_per_day() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let delta = StatsDelta {
            verifications: 1,
            successes: 1,
            new_devices: 1,
            ..StatsDelta::default()
        };
        store.apply("app", &delta, now).await.unwrap();
        store.apply("app", &delta, now).await.unwrap();

        let stats = store.app_statistics("app").await.unwrap().unwrap();
        assert_eq!(stats.total_activations, 2);
        let daily = store.daily(Some("app"), now.date_naive()).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].verification_count, 2);
        assert!(store.app_statistics("missing").await.unwrap().is_none());
    }
}
