//! Batch ETL for the epidemiological store.
//!
//! - `load`: aggregate source CSVs into the labelled weekly series and upsert it
//! - `export-features`: write the training table and its column contract
//! - `clear`: remove stored observations (all, or one year)

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use epi_sentinel::catalog::RegionEncoder;
use epi_sentinel::features::{self, ColumnContract};
use epi_sentinel::ingest::IngestOptions;
use epi_sentinel::{config, logging, pipeline, schema, store, Config};

#[derive(Parser)]
#[command(name = "epi-etl", about = "Surveillance data loader and feature exporter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate, label and upsert source CSVs
    Load {
        /// Source files; every *.csv in the data directory when omitted
        files: Vec<PathBuf>,
        /// Directory scanned when no files are given (overrides `DATA_DIR`)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Disease id stamped on every row (overrides `DISEASE_ID`)
        #[arg(long)]
        disease_id: Option<i32>,
        /// Status code of a confirmed case (overrides `CONFIRMED_STATUS`)
        #[arg(long)]
        confirmed_status: Option<i64>,
        /// Year of monthly tables whose file name has none
        #[arg(long)]
        year: Option<i32>,
        /// Stop before touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Export lag-feature training rows from the stored series
    ExportFeatures {
        /// Output CSV; the column contract goes to `<FILE>.columns.json`
        #[arg(long)]
        out: PathBuf,
        /// Only use weeks from this year on
        #[arg(long)]
        since_year: Option<i32>,
        /// Disease id to export (overrides `DISEASE_ID`)
        #[arg(long)]
        disease_id: Option<i32>,
    },
    /// Delete stored observations
    Clear {
        /// Only this calendar year
        #[arg(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Load {
            files,
            data_dir,
            disease_id,
            confirmed_status,
            year,
            dry_run,
        } => {
            // A dry run can go without a database URL
            let cfg = match config::load_from_env() {
                Ok(cfg) => Some(cfg),
                Err(e) if dry_run => {
                    tracing::warn!(error = %e, "configuration incomplete, using defaults for dry run");
                    None
                }
                Err(e) => return Err(e),
            };

            let mut opts = cfg
                .as_ref()
                .map(Config::ingest_options)
                .unwrap_or_default();
            if let Some(status) = confirmed_status {
                opts.confirmed_status = status;
            }
            opts.year = year;

            let disease_id = disease_id
                .or(cfg.as_ref().map(|c| c.disease_id))
                .unwrap_or(1);
            let data_dir = data_dir
                .or(cfg.as_ref().map(|c| c.data_dir.clone()))
                .unwrap_or_else(|| PathBuf::from("data"));

            load(cfg.as_ref(), files, &data_dir, &opts, disease_id, dry_run).await
        }
        Commands::ExportFeatures {
            out,
            since_year,
            disease_id,
        } => {
            let cfg = config::load_from_env()?;
            let pool = connect(&cfg).await?;
            let disease_id = disease_id.unwrap_or(cfg.disease_id);
            export_features(&pool, disease_id, since_year, out).await
        }
        Commands::Clear { year } => {
            let year = year.map(checked_year).transpose()?;
            let cfg = config::load_from_env()?;
            let pool = connect(&cfg).await?;
            let deleted = match year {
                Some(year) => store::clear_year(&pool, year).await?,
                None => store::clear_all(&pool).await?,
            };
            tracing::info!(?year, deleted, "observations cleared");
            Ok(())
        }
    }
}

fn checked_year(year: i32) -> Result<i32> {
    // ---
    ensure!(
        store::CLEARABLE_YEARS.contains(&year),
        "year out of range: {year} (expected {}..={})",
        store::CLEARABLE_YEARS.start(),
        store::CLEARABLE_YEARS.end()
    );
    Ok(year)
}

async fn connect(cfg: &Config) -> Result<PgPool> {
    // ---
    cfg.log_config();
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", cfg.masked_db_url()))?;
    schema::create_schema(&pool).await?;
    Ok(pool)
}

async fn load(
    cfg: Option<&Config>,
    files: Vec<PathBuf>,
    data_dir: &Path,
    opts: &IngestOptions,
    disease_id: i32,
    dry_run: bool,
) -> Result<()> {
    // ---
    let files = if files.is_empty() {
        pipeline::discover_sources(data_dir)
            .with_context(|| format!("cannot list {}", data_dir.display()))?
    } else {
        files
    };
    tracing::info!(files = files.len(), "starting load");

    let run = match pipeline::prepare(&files, opts, disease_id, Utc::now().date_naive()) {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(files = files.len(), error = %e, "load failed");
            return Err(e.into());
        }
    };

    let summary = run.summary();
    tracing::info!(
        files_used = summary.files_used,
        files_skipped = summary.files_skipped,
        observations = summary.weekly_rows,
        regions = summary.regions,
        total_cases = summary.total_cases,
        threshold = summary.threshold,
        at_risk = summary.at_risk_rows,
        clipped = summary.clipped,
        "run prepared"
    );

    if dry_run {
        tracing::info!("dry run, nothing written");
        return Ok(());
    }

    let cfg = cfg.context("DATABASE_URL is required to load")?;
    let pool = connect(cfg).await?;
    let report = pipeline::persist(&pool, &run).await?;
    tracing::info!(
        load_id = %report.load_id,
        rows_upserted = report.rows_upserted,
        "load complete"
    );
    Ok(())
}

async fn export_features(
    pool: &PgPool,
    disease_id: i32,
    since_year: Option<i32>,
    out: PathBuf,
) -> Result<()> {
    // ---
    let series = store::training_series(pool, disease_id, since_year).await?;
    let rows = features::build_training_rows(&series);
    let encoder = RegionEncoder::from_catalog();

    let file = File::create(&out).with_context(|| format!("cannot create {}", out.display()))?;
    features::export_training_csv(&rows, &encoder, BufWriter::new(file))?;

    let mut sidecar = out.clone().into_os_string();
    sidecar.push(".columns.json");
    let sidecar = PathBuf::from(sidecar);
    let contract = serde_json::to_string_pretty(&ColumnContract::new(&encoder))?;
    std::fs::write(&sidecar, contract)
        .with_context(|| format!("cannot write {}", sidecar.display()))?;

    tracing::info!(
        weeks = series.len(),
        rows = rows.len(),
        out = %out.display(),
        contract = %sidecar.display(),
        "training features exported"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn clear_year_matches_http_bounds() {
        // ---
        assert_eq!(checked_year(1900).unwrap(), 1900);
        assert_eq!(checked_year(2024).unwrap(), 2024);
        assert_eq!(checked_year(2100).unwrap(), 2100);
        assert!(checked_year(1899).is_err());
        assert!(checked_year(2101).is_err());
        assert!(checked_year(-5).is_err());
    }
}
