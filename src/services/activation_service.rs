//! Activation code management: batch generation, listing and revocation.

use crate::{
    crypto,
    error::AppError,
    models::{
        activation_code::{ActivationCode, CodeFilter, GenerateCodesRequest, NewCodeBatch},
        pagination::Pagination,
        statistics::StatsEvent,
    },
    services::statistics_service::StatisticsAggregator,
    store::ActivationCodeStore,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Largest batch a single request may generate.
pub const MAX_BATCH_SIZE: u32 = 1000;

/// Longest validity a batch may be given, in days.
pub const MAX_EXPIRY_DAYS: u32 = 36_500;

pub struct ActivationService {
    codes: Arc<dyn ActivationCodeStore>,
    statistics: StatisticsAggregator,
}

impl ActivationService {
    pub fn new(codes: Arc<dyn ActivationCodeStore>, statistics: StatisticsAggregator) -> Self {
        Self { codes, statistics }
    }

    /// Generate a batch of codes for one app.
    ///
    /// # Validation
    ///
    /// - `app_id` must not be blank
    /// - `count` must be in `1..=1000`
    /// - `max_devices` must be at least 1
    /// - `expires_in_days`, when given, must be in `1..=36500`
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: a validation rule failed
    /// - `Storage`: the batch could not be stored; no code of it persists
    pub async fn generate(
        &self,
        request: GenerateCodesRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivationCode>, AppError> {
        let app_id = request.app_id.trim();
        if app_id.is_empty() {
            return Err(AppError::InvalidRequest("app_id is required".to_string()));
        }
        if request.count == 0 || request.count > MAX_BATCH_SIZE {
            return Err(AppError::InvalidRequest(format!(
                "count must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        if request.max_devices < 1 {
            return Err(AppError::InvalidRequest(
                "max_devices must be at least 1".to_string(),
            ));
        }
        let expires_at = match request.expires_in_days {
            None => None,
            Some(days) => Some(expiry_deadline(now, days)?),
        };

        let batch = NewCodeBatch {
            app_id: app_id.to_string(),
            count: request.count,
            max_devices: request.max_devices,
            expires_at,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
        };

        let codes = self
            .codes
            .generate(&batch, crypto::generate_activation_code)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    operation = "generate_codes",
                    app_id = %batch.app_id,
                    count = batch.count,
                    error = %e,
                    "Store call failed"
                );
            })?;

        tracing::info!(
            app_id = %batch.app_id,
            count = codes.len(),
            max_devices = batch.max_devices,
            "Activation codes generated"
        );
        self.statistics.emit(StatsEvent::CodesGenerated {
            app_id: batch.app_id,
            count: codes.len() as i64,
        });

        Ok(codes)
    }

    /// Codes of one app, newest first.
    pub async fn list(
        &self,
        filter: &CodeFilter,
        page: Pagination,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ActivationCode>, i64), AppError> {
        let listed = self.codes.list(filter, page, now).await.inspect_err(|e| {
            tracing::error!(
                operation = "list_codes",
                app_id = %filter.app_id,
                error = %e,
                "Store call failed"
            );
        })?;
        Ok(listed)
    }

    /// Revoke a code so every later verification fails with `CODE_REVOKED`.
    ///
    /// Revoking an already revoked code succeeds without changing it.
    pub async fn revoke(
        &self,
        code: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ActivationCode, AppError> {
        let code = crypto::normalize_code(code);
        let reason = reason.filter(|r| !r.trim().is_empty());

        let (record, newly_revoked) = self
            .codes
            .revoke(&code, reason.as_deref(), now)
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "revoke_code", error = %e, "Store call failed");
            })?
            .ok_or(AppError::ActivationCodeNotFound)?;

        if newly_revoked {
            tracing::info!(app_id = %record.app_id, code_id = %record.id, "Activation code revoked");
            self.statistics.emit(StatsEvent::CodeRevoked {
                app_id: record.app_id.clone(),
            });
        }

        Ok(record)
    }
}

/// `now` plus `days`, rejecting values outside `1..=MAX_EXPIRY_DAYS` or past the
/// representable calendar.
fn expiry_deadline(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, AppError> {
    let out_of_range = || {
        AppError::InvalidRequest(format!(
            "expires_in_days must be between 1 and {}",
            MAX_EXPIRY_DAYS
        ))
    };
    if days == 0 || days > MAX_EXPIRY_DAYS {
        return Err(out_of_range());
    }
    Duration::try_days(i64::from(days))
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(out_of_range)
}
