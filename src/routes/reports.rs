//! Epidemiological reports over the stored weekly series.

use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::response::{ok, region_in_range, ApiResult};
use super::AppState;
use crate::models::{
    EpiWeekProfile, HighCaseWeek, MonthTrend, RegionRanking, RegionReportTotals, ReportTotals,
    YearMonthCases, YearTrend,
};
use crate::store;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/reports/epidemiological", get(national))
        .route("/api/reports/region/{id}", get(region))
}

#[derive(Serialize)]
struct NationalReport {
    totals: ReportTotals,
    top_regions: Vec<RegionRanking>,
    yearly_trend: Vec<YearTrend>,
    monthly_trend: Vec<MonthTrend>,
    by_epi_week: Vec<EpiWeekProfile>,
    year_comparison: Vec<YearMonthCases>,
    high_case_weeks: Vec<HighCaseWeek>,
    generated_at: DateTime<Utc>,
}

/// Handle `GET /api/reports/epidemiological`.
///
/// Trend windows are anchored on the latest stored week, not on today.
async fn national(State(state): State<AppState>) -> ApiResult<NationalReport> {
    // ---
    let pool = &state.pool;
    let disease_id = state.config.disease_id;

    let (totals, top_regions, yearly_trend, monthly_trend, by_epi_week, year_comparison, high_case_weeks) =
        tokio::try_join!(
            store::report_totals(pool, disease_id),
            store::top_regions(pool, disease_id),
            store::yearly_trend(pool, disease_id),
            store::recent_monthly_trend(pool, disease_id),
            store::epi_week_profile(pool, disease_id),
            store::year_comparison(pool, disease_id),
            store::high_case_weeks(pool, disease_id),
        )?;

    tracing::debug!(
        rows = totals.total_rows,
        regions = top_regions.len(),
        "epidemiological report built"
    );

    Ok(ok(NationalReport {
        totals,
        top_regions,
        yearly_trend,
        monthly_trend,
        by_epi_week,
        year_comparison,
        high_case_weeks,
        generated_at: Utc::now(),
    }))
}

#[derive(Serialize)]
struct RegionReport {
    region_id: i32,
    name: &'static str,
    totals: RegionReportTotals,
    monthly_trend: Vec<MonthTrend>,
}

/// Handle `GET /api/reports/region/{id}`.
async fn region(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<RegionReport> {
    // ---
    let region = region_in_range(id)?;
    let disease_id = state.config.disease_id;

    let (totals, monthly_trend) = tokio::try_join!(
        store::region_report_totals(&state.pool, disease_id, region.id),
        store::region_monthly_trend(&state.pool, disease_id, region.id),
    )?;

    Ok(ok(RegionReport {
        region_id: region.id,
        name: region.name,
        totals,
        monthly_trend,
    }))
}
