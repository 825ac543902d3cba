//! HTTP gateway: merges the per-area subrouters and attaches shared state.

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::config::Config;
use crate::forest::ModelContext;

mod alerts;
mod dashboard;
mod data;
mod health;
mod model_status;
mod predict;
mod predictions;
mod regions;
mod reports;
mod response;

// ---

/// State shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub models: Arc<ModelContext>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(regions::router())
        .merge(dashboard::router())
        .merge(predict::router())
        .merge(predictions::router())
        .merge(reports::router())
        .merge(data::router())
        .merge(alerts::router())
        .merge(model_status::router())
        .merge(health::router())
        .with_state(state)
}
