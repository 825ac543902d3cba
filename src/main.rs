//! Application entry point for the `epi-sentinel` API service.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema and region catalog if missing
//! - Loading the model artifacts into an immutable context
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving requests
//!
//! See [`epi_sentinel::config::load_from_env`] for the environment variables.
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use epi_sentinel::forest::ModelContext;
use epi_sentinel::routes::{self, AppState};
use epi_sentinel::{config, logging, schema, store};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    logging::init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database: {}", cfg.masked_db_url());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database '{}': {}",
                cfg.masked_db_url(),
                e
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    store::upsert_regions(&pool).await?;

    let models = Arc::new(ModelContext::load(&cfg));

    let addr = cfg.bind_addr;
    let state = AppState {
        pool,
        config: Arc::new(cfg),
        models,
    };

    // Build app from routes gateway
    let app: Router = routes::router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
