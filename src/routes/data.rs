//! Dataset endpoints: statistics, CSV preview and ingest, bulk clears.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;

use super::response::{ok, ApiError, ApiResult};
use super::AppState;
use crate::models::{DatasetStats, RegionSummary, WeeklyObservation};
use crate::pipeline::{self, FileReport, LoadReport, PreparedRun, RunSummary};
use crate::store;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Labelled rows echoed back by preview and ingest.
const PREVIEW_ROWS: usize = 10;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/data/stats", get(stats))
        .route("/api/data/by-region", get(by_region))
        .route("/api/data/preview", post(preview))
        .route("/api/data/ingest", post(ingest))
        .route("/api/data", delete(clear_all))
        .route("/api/data/year/{year}", delete(clear_year))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

async fn stats(State(state): State<AppState>) -> ApiResult<DatasetStats> {
    let stats = store::dataset_stats(&state.pool, state.config.disease_id).await?;
    Ok(ok(stats))
}

#[derive(Serialize)]
struct RegionBreakdown {
    regions: Vec<RegionSummary>,
}

async fn by_region(State(state): State<AppState>) -> ApiResult<RegionBreakdown> {
    let regions = store::region_summaries(&state.pool, state.config.disease_id).await?;
    Ok(ok(RegionBreakdown { regions }))
}

/// Pull the `file` part out of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    // ---
    let bad = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.body_text());

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        if !name.to_lowercase().ends_with(".csv") {
            return Err(ApiError::BadRequest(format!(
                "only .csv files are accepted, got '{name}'"
            )));
        }
        let bytes = field.bytes().await.map_err(bad)?;
        return Ok((name, bytes.to_vec()));
    }
    Err(ApiError::BadRequest("missing multipart field 'file'".to_string()))
}

/// Run the pipeline over an upload off the async workers.
async fn prepare(state: &AppState, name: String, bytes: Vec<u8>) -> Result<PreparedRun, ApiError> {
    // ---
    let opts = state.config.ingest_options();
    let disease_id = state.config.disease_id;
    let load_date = Utc::now().date_naive();

    tokio::task::spawn_blocking(move || {
        pipeline::prepare_upload(&name, &bytes, &opts, disease_id, load_date)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("upload task failed: {e}")))?
    .map_err(ApiError::from)
}

#[derive(Serialize)]
struct Preview {
    file: String,
    summary: RunSummary,
    files: Vec<FileReport>,
    preview: Vec<WeeklyObservation>,
}

fn preview_of(file: String, run: &PreparedRun) -> Preview {
    Preview {
        file,
        summary: run.summary(),
        files: run.files.clone(),
        preview: run.observations().iter().take(PREVIEW_ROWS).cloned().collect(),
    }
}

/// Handle `POST /api/data/preview`: aggregate and label without persisting.
async fn preview(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Preview> {
    // ---
    let (name, bytes) = read_upload(multipart).await?;
    let run = prepare(&state, name.clone(), bytes).await?;
    Ok(ok(preview_of(name, &run)))
}

#[derive(Serialize)]
struct Ingested {
    #[serde(flatten)]
    preview: Preview,
    load: LoadReport,
}

/// Handle `POST /api/data/ingest`: aggregate, label and upsert.
async fn ingest(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Ingested> {
    // ---
    let (name, bytes) = read_upload(multipart).await?;
    let run = prepare(&state, name.clone(), bytes).await?;
    let load = pipeline::persist(&state.pool, &run).await?;

    tracing::info!(
        file = %name,
        load_id = %load.load_id,
        rows = load.rows_upserted,
        threshold = run.labeled.threshold,
        "upload ingested"
    );
    Ok(ok(Ingested {
        preview: preview_of(name, &run),
        load,
    }))
}

#[derive(Serialize)]
struct Cleared {
    deleted: u64,
}

async fn clear_all(State(state): State<AppState>) -> ApiResult<Cleared> {
    // ---
    let deleted = store::clear_all(&state.pool).await?;
    tracing::warn!(deleted, "all observations cleared");
    Ok(ok(Cleared { deleted }))
}

async fn clear_year(State(state): State<AppState>, Path(year): Path<i32>) -> ApiResult<Cleared> {
    // ---
    if !store::CLEARABLE_YEARS.contains(&year) {
        return Err(ApiError::BadRequest(format!("year out of range: {year}")));
    }
    let deleted = store::clear_year(&state.pool, year).await?;
    tracing::warn!(year, deleted, "observations cleared for year");
    Ok(ok(Cleared { deleted }))
}
