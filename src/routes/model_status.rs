//! Which models are loaded and what they expect.

use axum::{extract::State, routing::get, Router};
use serde::Serialize;

use super::response::{ok, ApiResult};
use super::AppState;
use crate::forest::ModelInfo;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/models", get(status))
}

#[derive(Serialize)]
struct ModelStatus {
    classifier: ModelInfo,
    regressor: ModelInfo,
    /// Projection used when no regressor is loaded.
    fallback: &'static str,
}

async fn status(State(state): State<AppState>) -> ApiResult<ModelStatus> {
    Ok(ok(ModelStatus {
        classifier: state.models.classifier_info(),
        regressor: state.models.regressor_info(),
        fallback: "weighted_average",
    }))
}
