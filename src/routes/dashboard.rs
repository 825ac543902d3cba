//! Headline numbers for the dashboard.

use axum::{extract::State, routing::get, Router};
use serde::Serialize;

use super::response::{ok, ApiResult};
use super::AppState;
use crate::store;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/dashboard/summary", get(summary))
}

#[derive(Serialize)]
struct DashboardSummary {
    total_cases: i64,
    regions_monitored: i64,
    active_alerts: i64,
    classifier_loaded: bool,
    regressor_loaded: bool,
}

async fn summary(State(state): State<AppState>) -> ApiResult<DashboardSummary> {
    // ---
    let (total_cases, regions_monitored) =
        store::case_totals(&state.pool, state.config.disease_id).await?;
    let active_alerts = store::count_active_alerts(&state.pool).await?;

    Ok(ok(DashboardSummary {
        total_cases,
        regions_monitored,
        active_alerts,
        classifier_loaded: state.models.classifier.is_some(),
        regressor_loaded: state.models.regressor.is_some(),
    }))
}
