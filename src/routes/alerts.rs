//! Alert generation, recording and lifecycle.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::predict::assess_next_week;
use super::response::{ok, ApiError, ApiResult};
use super::AppState;
use crate::catalog::REGIONS;
use crate::models::{AlertRecord, AlertStatus, NewAlert};
use crate::store;

/// Minimum probability (percent) for a generated alert.
const DEFAULT_ALERT_THRESHOLD: f64 = 50.0;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/alerts", post(record_one))
        .route("/api/alerts/bulk", post(record_bulk))
        .route("/api/alerts/generate", post(generate))
        .route("/api/alerts/active", get(active))
        .route("/api/alerts/history", get(history))
        .route("/api/alerts/{id}/resolve", put(resolve))
}

#[derive(Deserialize, Default)]
struct GenerateRequest {
    threshold: Option<f64>,
}

#[derive(Serialize)]
struct Generated {
    threshold: f64,
    evaluated: usize,
    skipped: usize,
    alerts: Vec<NewAlert>,
}

/// Handle `POST /api/alerts/generate`.
///
/// Assesses every region with enough history and returns the candidates at
/// or above the threshold, most probable first. Nothing is persisted.
async fn generate(
    State(state): State<AppState>,
    body: Option<Json<GenerateRequest>>,
) -> ApiResult<Generated> {
    // ---
    let Json(req) = body.unwrap_or_default();
    let threshold = req.threshold.unwrap_or(DEFAULT_ALERT_THRESHOLD);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ApiError::BadRequest(format!(
            "threshold must be between 0 and 100, got {threshold}"
        )));
    }

    let mut alerts = Vec::new();
    let mut evaluated = 0;
    let mut skipped = 0;

    for region in &REGIONS {
        match assess_next_week(&state, region).await {
            Ok((assessment, _)) => {
                evaluated += 1;
                if assessment.probability >= threshold {
                    alerts.push(assessment.to_alert());
                }
            }
            Err(ApiError::NotFound(_)) | Err(ApiError::InsufficientHistory(_)) => {
                tracing::debug!(region_id = region.id, "region skipped for alert generation");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    alerts.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    tracing::info!(evaluated, skipped, candidates = alerts.len(), "alerts generated");

    Ok(ok(Generated {
        threshold,
        evaluated,
        skipped,
        alerts,
    }))
}

#[derive(Serialize)]
struct Recorded {
    id: i32,
}

/// Handle `POST /api/alerts`: record one alert as sent.
async fn record_one(
    State(state): State<AppState>,
    Json(alert): Json<NewAlert>,
) -> ApiResult<Recorded> {
    // ---
    super::response::region_in_range(alert.region_id)?;
    let id = store::insert_alert(&state.pool, &alert, AlertStatus::Sent).await?;
    Ok(ok(Recorded { id }))
}

#[derive(Deserialize)]
struct BulkRequest {
    alerts: Vec<NewAlert>,
}

#[derive(Serialize)]
struct BulkRecorded {
    count: usize,
    ids: Vec<i32>,
}

/// Handle `POST /api/alerts/bulk`: record many alerts as sent.
async fn record_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> ApiResult<BulkRecorded> {
    // ---
    for alert in &req.alerts {
        super::response::region_in_range(alert.region_id)?;
    }

    let mut ids = Vec::with_capacity(req.alerts.len());
    for alert in &req.alerts {
        ids.push(store::insert_alert(&state.pool, alert, AlertStatus::Sent).await?);
    }
    Ok(ok(BulkRecorded {
        count: ids.len(),
        ids,
    }))
}

#[derive(Serialize)]
struct AlertList {
    count: usize,
    alerts: Vec<AlertRecord>,
}

async fn active(State(state): State<AppState>) -> ApiResult<AlertList> {
    let alerts = store::active_alerts(&state.pool).await?;
    Ok(ok(AlertList {
        count: alerts.len(),
        alerts,
    }))
}

async fn history(State(state): State<AppState>) -> ApiResult<AlertList> {
    let alerts = store::alert_history(&state.pool).await?;
    Ok(ok(AlertList {
        count: alerts.len(),
        alerts,
    }))
}

#[derive(Deserialize, Default)]
struct ResolveRequest {
    resolution: Option<String>,
}

#[derive(Serialize)]
struct Resolved {
    alert: AlertRecord,
}

/// Handle `PUT /api/alerts/{id}/resolve`.
async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Resolved> {
    // ---
    let Json(req) = body.unwrap_or_default();
    let alert = store::resolve_alert(&state.pool, id, req.resolution.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))?;
    Ok(ok(Resolved { alert }))
}
