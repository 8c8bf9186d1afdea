//! Statistics aggregation and reporting.
//!
//! Core operations emit [`StatsEvent`]s here. Applying an event is best
//! effort: it runs on a spawned task and a failure is logged, never returned
//! to the request that produced it.

use crate::{
    error::AppError,
    models::statistics::{
        AppStatistics, DailyStats, StatisticsOverview, StatisticsTotals, StatsEvent, TrendResponse,
    },
    store::StatisticsStore,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;

/// Days covered by the overview.
const OVERVIEW_DAYS: i64 = 7;

const DEFAULT_TREND_DAYS: i64 = 7;
const MAX_TREND_DAYS: i64 = 90;

#[derive(Clone)]
pub struct StatisticsAggregator {
    store: Arc<dyn StatisticsStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    /// Apply `event` in the background.
    pub fn emit(&self, event: StatsEvent) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.apply(&event, Utc::now()).await {
                tracing::warn!(app_id = %event.app_id(), error = %e, "Failed to record statistics");
            }
        });
    }

    /// Apply `event` and wait for the store.
    pub async fn apply(&self, event: &StatsEvent, now: DateTime<Utc>) -> Result<(), AppError> {
        self.store.apply(event.app_id(), &event.deltas(), now).await?;
        Ok(())
    }

    /// Totals across every app and the daily rows of the last seven days.
    pub async fn overview(&self, now: DateTime<Utc>) -> Result<StatisticsOverview, AppError> {
        let apps = self.store.all_app_statistics().await.inspect_err(|e| {
            tracing::error!(operation = "all_app_statistics", error = %e, "Store call failed");
        })?;

        let mut total = StatisticsTotals {
            apps: apps.len() as i64,
            ..StatisticsTotals::default()
        };
        for app in &apps {
            total.total_activations += app.total_activations;
            total.successful_verifications += app.successful_verifications;
            total.failed_verifications += app.failed_verifications;
            total.codes_generated += app.codes_generated;
            total.codes_revoked += app.codes_revoked;
        }

        let since = first_day(now, OVERVIEW_DAYS);
        let last_7_days = self.store.daily(None, since).await.inspect_err(|e| {
            tracing::error!(operation = "daily_stats", error = %e, "Store call failed");
        })?;

        Ok(StatisticsOverview { total, last_7_days })
    }

    /// Lifetime counters for one app.
    ///
    /// # Errors
    ///
    /// `StatisticsNotFound` if no event was ever recorded for the app.
    pub async fn app(&self, app_id: &str) -> Result<AppStatistics, AppError> {
        self.store
            .app_statistics(app_id)
            .await
            .inspect_err(|e| {
                tracing::error!(operation = "app_statistics", app_id = %app_id, error = %e, "Store call failed");
            })?
            .ok_or(AppError::StatisticsNotFound)
    }

    /// One row per day for the last `days` days (default 7, clamped to 1..=90),
    /// oldest first. Days without activity are zero rows.
    pub async fn trends(
        &self,
        app_id: &str,
        days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<TrendResponse, AppError> {
        let days = days.unwrap_or(DEFAULT_TREND_DAYS).clamp(1, MAX_TREND_DAYS);
        let since = first_day(now, days);
        let recorded = self.store.daily(Some(app_id), since).await.inspect_err(|e| {
            tracing::error!(operation = "daily_stats", app_id = %app_id, error = %e, "Store call failed");
        })?;

        let data = (0..days)
            .map(|offset| since + Duration::days(offset))
            .map(|day| {
                recorded
                    .iter()
                    .find(|row| row.day == day)
                    .cloned()
                    .unwrap_or_else(|| DailyStats::empty(app_id, day))
            })
            .collect();

        Ok(TrendResponse {
            app_id: app_id.to_string(),
            days: days as u32,
            data,
        })
    }

    /// Apps with the most device activations.
    pub async fn top_apps(&self, limit: usize) -> Result<Vec<AppStatistics>, AppError> {
        let mut apps = self.store.all_app_statistics().await.inspect_err(|e| {
            tracing::error!(operation = "all_app_statistics", error = %e, "Store call failed");
        })?;
        apps.sort_by(|a, b| {
            b.total_activations
                .cmp(&a.total_activations)
                .then_with(|| a.app_id.cmp(&b.app_id))
        });
        apps.truncate(limit);
        Ok(apps)
    }
}

/// First day of a window of `days` days ending today (UTC).
fn first_day(now: DateTime<Utc>, days: i64) -> NaiveDate {
    now.date_naive() - Duration::days(days - 1)
}
