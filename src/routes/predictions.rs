//! Saved prediction batches: store, list, fetch and delete.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::response::{ok, region_in_range, ApiError, ApiResult};
use super::AppState;
use crate::models::{NewSavedPrediction, SavedPrediction, SavedPredictionSummary};
use crate::store;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/predictions", post(save))
        .route("/api/predictions/history", get(history))
        .route("/api/predictions/{id}", get(fetch).delete(remove))
}

/// Reject batches that cannot be stored or read back meaningfully.
fn check(prediction: &NewSavedPrediction) -> Result<(), ApiError> {
    // ---
    if prediction.region_name.trim().is_empty() {
        return Err(ApiError::BadRequest("region_name must not be empty".to_string()));
    }
    if prediction.weeks < 1 {
        return Err(ApiError::BadRequest(format!(
            "weeks must be at least 1, got {}",
            prediction.weeks
        )));
    }
    if !prediction.predictions.is_array() {
        return Err(ApiError::BadRequest("predictions must be a JSON array".to_string()));
    }
    if let Some(region_id) = prediction.region_id {
        region_in_range(region_id)?;
    }
    Ok(())
}

fn default_batch_name(generated_at: DateTime<Utc>) -> String {
    format!("Prediction {}", generated_at.format("%Y-%m-%d %H:%M"))
}

#[derive(Serialize)]
struct Saved {
    id: i32,
    batch_name: String,
    generated_at: DateTime<Utc>,
}

/// Handle `POST /api/predictions`.
async fn save(
    State(state): State<AppState>,
    Json(prediction): Json<NewSavedPrediction>,
) -> ApiResult<Saved> {
    // ---
    check(&prediction)?;

    let generated_at = Utc::now();
    let batch_name = prediction
        .batch_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_batch_name(generated_at));

    let id = store::insert_saved_prediction(&state.pool, &prediction, &batch_name, generated_at)
        .await?;
    tracing::info!(id, batch = %batch_name, region = %prediction.region_name, "prediction saved");

    Ok(ok(Saved {
        id,
        batch_name,
        generated_at,
    }))
}

#[derive(Serialize)]
struct History {
    count: usize,
    predictions: Vec<SavedPredictionSummary>,
}

async fn history(State(state): State<AppState>) -> ApiResult<History> {
    let predictions = store::saved_prediction_history(&state.pool).await?;
    Ok(ok(History {
        count: predictions.len(),
        predictions,
    }))
}

#[derive(Serialize)]
struct Fetched {
    prediction: SavedPrediction,
}

async fn fetch(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Fetched> {
    // ---
    let prediction = store::saved_prediction(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("prediction {id} not found")))?;
    Ok(ok(Fetched { prediction }))
}

#[derive(Serialize)]
struct Removed {
    id: i32,
}

async fn remove(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Removed> {
    // ---
    if !store::delete_saved_prediction(&state.pool, id).await? {
        return Err(ApiError::NotFound(format!("prediction {id} not found")));
    }
    tracing::info!(id, "saved prediction deleted");
    Ok(ok(Removed { id }))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn request(body: serde_json::Value) -> NewSavedPrediction {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn accepts_a_complete_batch() {
        // ---
        let p = request(serde_json::json!({
            "region_name": "Colima",
            "region_id": 6,
            "start_date": "2024-03-10",
            "weeks": 4,
            "predictions": [{"week": 1, "cases": 12}]
        }));
        assert!(check(&p).is_ok());
    }

    #[test]
    fn rejects_malformed_batches() {
        // ---
        let base = serde_json::json!({
            "region_name": "Colima",
            "start_date": "2024-03-10",
            "weeks": 4,
            "predictions": []
        });

        let mut zero_weeks = base.clone();
        zero_weeks["weeks"] = 0.into();
        assert!(matches!(check(&request(zero_weeks)), Err(ApiError::BadRequest(_))));

        let mut blank_name = base.clone();
        blank_name["region_name"] = " ".into();
        assert!(matches!(check(&request(blank_name)), Err(ApiError::BadRequest(_))));

        let mut not_a_list = base.clone();
        not_a_list["predictions"] = serde_json::json!({"week": 1});
        assert!(matches!(check(&request(not_a_list)), Err(ApiError::BadRequest(_))));

        let mut bad_region = base;
        bad_region["region_id"] = 40.into();
        assert!(matches!(check(&request(bad_region)), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn names_unnamed_batches_by_time() {
        // ---
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 14, 5, 9).unwrap();
        assert_eq!(default_batch_name(at), "Prediction 2024-03-10 14:05");
    }
}
