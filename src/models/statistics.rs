//! Reporting models fed by core events.

use super::api_key::ApiKeyStats;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An outcome emitted by the trust core for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsEvent {
    /// A verification request that passed the signature check.
    Verification {
        app_id: String,
        success: bool,
        new_device: bool,
    },
    CodesGenerated { app_id: String, count: i64 },
    CodeRevoked { app_id: String },
}

impl StatsEvent {
    pub fn app_id(&self) -> &str {
        match self {
            StatsEvent::Verification { app_id, .. }
            | StatsEvent::CodesGenerated { app_id, .. }
            | StatsEvent::CodeRevoked { app_id } => app_id,
        }
    }

    /// Counter increments carried by this event.
    pub fn deltas(&self) -> StatsDelta {
        match self {
            StatsEvent::Verification {
                success,
                new_device,
                ..
            } => StatsDelta {
                verifications: 1,
                successes: i64::from(*success),
                failures: i64::from(!*success),
                new_devices: i64::from(*success && *new_device),
                ..StatsDelta::default()
            },
            StatsEvent::CodesGenerated { count, .. } => StatsDelta {
                codes_generated: *count,
                ..StatsDelta::default()
            },
            StatsEvent::CodeRevoked { .. } => StatsDelta {
                codes_revoked: 1,
                ..StatsDelta::default()
            },
        }
    }
}

/// Counter increments applied by a store in one upsert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsDelta {
    pub verifications: i64,
    pub successes: i64,
    pub failures: i64,
    pub new_devices: i64,
    pub codes_generated: i64,
    pub codes_revoked: i64,
}

/// Lifetime counters for one app.
///
/// # Database Table
///
/// Maps to the `app_statistics` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AppStatistics {
    pub app_id: String,
    /// Devices newly bound across all codes of the app
    pub total_activations: i64,
    pub successful_verifications: i64,
    pub failed_verifications: i64,
    pub codes_generated: i64,
    pub codes_revoked: i64,
    pub updated_at: DateTime<Utc>,
}

impl AppStatistics {
    pub fn empty(app_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            app_id: app_id.to_string(),
            total_activations: 0,
            successful_verifications: 0,
            failed_verifications: 0,
            codes_generated: 0,
            codes_revoked: 0,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, delta: &StatsDelta, now: DateTime<Utc>) {
        self.total_activations += delta.new_devices;
        self.successful_verifications += delta.successes;
        self.failed_verifications += delta.failures;
        self.codes_generated += delta.codes_generated;
        self.codes_revoked += delta.codes_revoked;
        self.updated_at = now;
    }
}

/// Counters for one app on one day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DailyStats {
    pub app_id: String,
    pub day: NaiveDate,
    pub verification_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub new_devices: i64,
    pub codes_generated: i64,
    pub codes_revoked: i64,
}

impl DailyStats {
    pub fn empty(app_id: &str, day: NaiveDate) -> Self {
        Self {
            app_id: app_id.to_string(),
            day,
            verification_count: 0,
            success_count: 0,
            failure_count: 0,
            new_devices: 0,
            codes_generated: 0,
            codes_revoked: 0,
        }
    }

    pub fn apply(&mut self, delta: &StatsDelta) {
        self.verification_count += delta.verifications;
        self.success_count += delta.successes;
        self.failure_count += delta.failures;
        self.new_devices += delta.new_devices;
        self.codes_generated += delta.codes_generated;
        self.codes_revoked += delta.codes_revoked;
    }
}

/// Totals across every app.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsTotals {
    pub apps: i64,
    pub total_activations: i64,
    pub successful_verifications: i64,
    pub failed_verifications: i64,
    pub codes_generated: i64,
    pub codes_revoked: i64,
}

#[derive(Debug, Serialize)]
pub struct StatisticsOverview {
    pub total: StatisticsTotals,
    /// Daily rows across all apps for the last seven days, oldest first
    pub last_7_days: Vec<DailyStats>,
}

/// Dashboard summary: key counts, overall statistics and the leading apps.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub api_keys: ApiKeyStats,
    pub stats: StatisticsOverview,
    pub top_apps: Vec<AppStatistics>,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub app_id: String,
    pub days: u32,
    pub data: Vec<DailyStats>,
}
