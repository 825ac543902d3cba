//! Reference data: regions and diseases.

use axum::{extract::State, routing::get, Router};
use serde::Serialize;

use super::response::{ok, ApiResult};
use super::AppState;
use crate::models::{Disease, Region};
use crate::store;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/regions", get(list_regions))
        .route("/api/diseases", get(list_diseases))
}

#[derive(Serialize)]
struct RegionList {
    count: usize,
    regions: Vec<Region>,
}

async fn list_regions(State(state): State<AppState>) -> ApiResult<RegionList> {
    // ---
    let regions = store::list_regions(&state.pool).await?;
    Ok(ok(RegionList {
        count: regions.len(),
        regions,
    }))
}

#[derive(Serialize)]
struct DiseaseList {
    diseases: Vec<Disease>,
}

async fn list_diseases(State(state): State<AppState>) -> ApiResult<DiseaseList> {
    let diseases = store::list_diseases(&state.pool).await?;
    Ok(ok(DiseaseList { diseases }))
}
