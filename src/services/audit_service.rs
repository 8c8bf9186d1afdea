//! Administrative audit trail.

use crate::{
    error::AppError,
    models::{
        audit::{AuditLogEntry, NewAuditEntry},
        pagination::Pagination,
    },
    store::AuditLogStore,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditLogStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditLogStore>) -> Self {
        Self { store }
    }

    /// Append `entry` in the background.
    ///
    /// The request being audited never waits for, or fails because of, the write.
    pub fn record(&self, entry: NewAuditEntry) {
        let this = self.clone();
        tokio::spawn(async move {
            this.write(entry).await;
        });
    }

    /// Append `entry` now, logging any failure.
    pub async fn write(&self, entry: NewAuditEntry) {
        if let Err(e) = self.store.append(&entry, Utc::now()).await {
            tracing::error!(
                action = %entry.action,
                actor_key_id = %entry.actor_key_id,
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }

    pub async fn list(
        &self,
        actor_key_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<(Vec<AuditLogEntry>, i64), AppError> {
        let listed = self
            .store
            .list_entries(actor_key_id, page)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    operation = "list_audit_entries",
                    actor_key_id = ?actor_key_id,
                    error = %e,
                    "Store call failed"
                );
            })?;
        Ok(listed)
    }
}
