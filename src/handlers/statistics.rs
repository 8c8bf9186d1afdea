//! Statistics HTTP handlers. All require `statistics:read`.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        permission::Permission,
        statistics::{
            AppStatistics, DashboardResponse, StatisticsOverview, TrendQuery, TrendResponse,
        },
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{PathRejection, QueryRejection}},
};
use chrono::Utc;

/// Apps shown on the dashboard.
const DASHBOARD_TOP_APPS: usize = 5;

/// Totals across every app plus the last seven days.
///
/// # Endpoint
///
/// `GET /api/admin/statistics`
pub async fn overview(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatisticsOverview>, AppError> {
    auth.require(Permission::ReadStatistics)?;
    Ok(Json(state.statistics.overview(Utc::now()).await?))
}

/// Key counts, the overview and the five most activated apps.
///
/// # Endpoint
///
/// `GET /api/admin/statistics/dashboard`
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<DashboardResponse>, AppError> {
    auth.require(Permission::ReadStatistics)?;

    Ok(Json(DashboardResponse {
        api_keys: state.api_keys.stats().await?,
        stats: state.statistics.overview(Utc::now()).await?,
        top_apps: state.statistics.top_apps(DASHBOARD_TOP_APPS).await?,
    }))
}

/// # Endpoint
///
/// `GET /api/admin/statistics/apps/{app_id}`
///
/// 404 when nothing was ever recorded for the app.
pub async fn app_statistics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<AppStatistics>, AppError> {
    auth.require(Permission::ReadStatistics)?;
    let Path(app_id) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.statistics.app(&app_id).await?))
}

/// Daily series for one app.
///
/// # Endpoint
///
/// `GET /api/admin/statistics/apps/{app_id}/trends?days=7`
///
/// `days` defaults to 7 and is clamped to 1..=90.
pub async fn trends(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<TrendQuery>, QueryRejection>,
) -> Result<Json<TrendResponse>, AppError> {
    auth.require(Permission::ReadStatistics)?;
    let Path(app_id) = path.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let Query(query) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    Ok(Json(
        state
            .statistics
            .trends(&app_id, query.days, Utc::now())
            .await?,
    ))
}
