//! Risk prediction endpoints.
//!
//! Both endpoints fetch a short window of stored weeks and hand it to
//! [`inference::assess`]; no features are computed here.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::response::{ok, region_in_range, ApiError, ApiResult};
use super::AppState;
use crate::catalog::RegionInfo;
use crate::inference::{self, Assessment};
use crate::models::AlertStatus;
use crate::store::{self, NEAREST_WEEK_TOLERANCE_DAYS};

/// Stored weeks fetched per assessment; the features use the last four.
const HISTORY_WINDOW: i64 = 6;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/predict/auto", post(predict_auto))
        .route("/api/predict/advanced", post(predict_advanced))
}

/// Assess the week after the region's latest stored week.
///
/// Returns the assessment and that latest week. `NotFound` when the region
/// has no data.
pub(super) async fn assess_next_week(
    state: &AppState,
    region: &RegionInfo,
) -> Result<(Assessment, NaiveDate), ApiError> {
    // ---
    let disease_id = state.config.disease_id;
    let latest = store::latest_week(&state.pool, disease_id, region.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no data for region {}", region.name)))?;

    let eval_date = latest + Duration::days(7);
    let history =
        store::recent_before(&state.pool, disease_id, region.id, eval_date, HISTORY_WINDOW).await?;

    let assessment = inference::assess(&state.models, region.id, region.name, eval_date, &history)?;
    Ok((assessment, latest))
}

#[derive(Deserialize)]
struct AutoRequest {
    region_id: i32,
}

#[derive(Serialize)]
struct AutoResponse {
    #[serde(flatten)]
    assessment: Assessment,
    latest_week: NaiveDate,
    alert_id: Option<i32>,
}

/// Handle `POST /api/predict/auto`.
///
/// An at-risk prediction records an `active` alert; failing to record it
/// does not fail the request.
async fn predict_auto(
    State(state): State<AppState>,
    Json(req): Json<AutoRequest>,
) -> ApiResult<AutoResponse> {
    // ---
    let region = region_in_range(req.region_id)?;
    let (assessment, latest_week) = assess_next_week(&state, region).await?;

    let alert_id = if assessment.predicted_class == 1 {
        match store::insert_alert(&state.pool, &assessment.to_alert(), AlertStatus::Active).await {
            Ok(id) => {
                tracing::info!(region_id = region.id, alert_id = id, "alert recorded");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(region_id = region.id, error = %e, "failed to record alert");
                None
            }
        }
    } else {
        None
    };

    Ok(ok(AutoResponse {
        assessment,
        latest_week,
        alert_id,
    }))
}

#[derive(Deserialize)]
struct AdvancedRequest {
    region_id: i32,
    evaluation_date: String,
    #[serde(default)]
    week_offset: i64,
}

/// Comparison with an observed week near the evaluation date.
#[derive(Debug, Serialize, PartialEq)]
struct Validation {
    observed_week: NaiveDate,
    observed_cases: i64,
    predicted_cases: i64,
    difference: i64,
    absolute_error: i64,
    /// `None` when nothing was observed.
    percentage_error: Option<f64>,
}

impl Validation {
    fn new(observed_week: NaiveDate, observed_cases: i64, predicted_cases: i64) -> Self {
        // ---
        let difference = predicted_cases - observed_cases;
        let percentage_error = (observed_cases != 0).then(|| {
            let pct = difference.abs() as f64 / observed_cases as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        });
        Self {
            observed_week,
            observed_cases,
            predicted_cases,
            difference,
            absolute_error: difference.abs(),
            percentage_error,
        }
    }
}

#[derive(Serialize)]
struct AdvancedResponse {
    #[serde(flatten)]
    assessment: Assessment,
    latest_week: NaiveDate,
    future_projection: bool,
    weeks_ahead: i64,
    validation: Option<Validation>,
}

/// Shift `date` by whole weeks; offsets beyond the calendar are a 400.
fn offset_by_weeks(date: NaiveDate, weeks: i64) -> Result<NaiveDate, ApiError> {
    // ---
    Duration::try_weeks(weeks)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or_else(|| ApiError::BadRequest(format!("week_offset out of range: {weeks}")))
}

/// Handle `POST /api/predict/advanced`.
async fn predict_advanced(
    State(state): State<AppState>,
    Json(req): Json<AdvancedRequest>,
) -> ApiResult<AdvancedResponse> {
    // ---
    let region = region_in_range(req.region_id)?;
    let date = NaiveDate::parse_from_str(req.evaluation_date.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "evaluation_date must be YYYY-MM-DD, got '{}'",
            req.evaluation_date
        ))
    })?;
    let eval_date = offset_by_weeks(date, req.week_offset)?;
    let disease_id = state.config.disease_id;

    let latest_week = store::latest_week(&state.pool, disease_id, region.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no data for region {}", region.name)))?;

    let history =
        store::recent_before(&state.pool, disease_id, region.id, eval_date, HISTORY_WINDOW).await?;
    let assessment = inference::assess(&state.models, region.id, region.name, eval_date, &history)?;

    let future_projection = eval_date > latest_week;
    let weeks_ahead = if future_projection {
        (eval_date - latest_week).num_days() / 7
    } else {
        0
    };

    let validation = store::nearest_observation(
        &state.pool,
        disease_id,
        region.id,
        eval_date,
        NEAREST_WEEK_TOLERANCE_DAYS,
    )
    .await?
    .map(|obs| Validation::new(obs.week_ending, obs.case_count, assessment.expected_cases));

    Ok(ok(AdvancedResponse {
        assessment,
        latest_week,
        future_projection,
        weeks_ahead,
        validation,
    }))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn validation_reports_errors() {
        // ---
        let week = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let v = Validation::new(week, 40, 30);
        assert_eq!(v.difference, -10);
        assert_eq!(v.absolute_error, 10);
        assert_eq!(v.percentage_error, Some(25.0));

        let v = Validation::new(week, 0, 3);
        assert_eq!(v.percentage_error, None);
    }

    #[test]
    fn advanced_request_defaults_offset() {
        // ---
        let req: AdvancedRequest =
            serde_json::from_str(r#"{"region_id": 12, "evaluation_date": "2024-03-10"}"#).unwrap();
        assert_eq!(req.week_offset, 0);
    }

    #[test]
    fn offsets_by_whole_weeks() {
        // ---
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(
            offset_by_weeks(date, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 24).unwrap()
        );
        assert_eq!(
            offset_by_weeks(date, -1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
        assert!(matches!(
            offset_by_weeks(date, 100_000_000),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            offset_by_weeks(date, i64::MIN),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn huge_week_offset_is_a_bad_request() {
        // ---
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/epi")
            .unwrap();
        let state = AppState {
            pool,
            config: std::sync::Arc::new(crate::config::Config::for_tests()),
            models: std::sync::Arc::new(crate::forest::ModelContext::default()),
        };
        let req = AdvancedRequest {
            region_id: 12,
            evaluation_date: "2024-03-10".to_string(),
            week_offset: 100_000_000,
        };

        let result = predict_advanced(State(state), Json(req)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
