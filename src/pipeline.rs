//! The batch run: source files → weekly counts → labelled observations → store.
//!
//! [`prepare`] and [`prepare_batches`] are pure and never touch the
//! database, so the same run can be previewed or persisted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{PipelineError, UploadError};
use crate::incidence::{self, LabeledBatch};
use crate::ingest::{self, IngestOptions, IngestStats, SourceBatch, SourceFormat};
use crate::models::WeeklyObservation;
use crate::store;

// ---

/// How one source file was read.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub name: String,
    pub format: SourceFormat,
    pub weekly_rows: usize,
    pub stats: IngestStats,
}

/// A labelled run, ready to preview or persist.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    // ---
    pub files: Vec<FileReport>,
    pub skipped: Vec<String>,
    pub labeled: LabeledBatch,
}

/// Aggregate facts about a prepared run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    // ---
    pub files_used: usize,
    pub files_skipped: usize,
    pub rows_read: usize,
    /// Rows or monthly cells that contributed cases.
    pub confirmed: usize,
    pub weekly_rows: usize,
    pub regions: usize,
    pub years: Vec<i32>,
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
    pub total_cases: i64,
    pub threshold: f64,
    pub at_risk_rows: usize,
    pub clipped: usize,
}

impl PreparedRun {
    pub fn observations(&self) -> &[WeeklyObservation] {
        &self.labeled.observations
    }

    pub fn summary(&self) -> RunSummary {
        // ---
        let obs = self.observations();
        let regions: BTreeSet<i32> = obs.iter().map(|o| o.region_id).collect();
        let years: BTreeSet<i32> = obs.iter().map(|o| o.week_ending.year()).collect();

        RunSummary {
            files_used: self.files.len(),
            files_skipped: self.skipped.len(),
            rows_read: self.files.iter().map(|f| f.stats.rows_read).sum(),
            confirmed: self.files.iter().map(|f| f.stats.rows_used).sum(),
            weekly_rows: obs.len(),
            regions: regions.len(),
            years: years.into_iter().collect(),
            first_week: obs.iter().map(|o| o.week_ending).min(),
            last_week: obs.iter().map(|o| o.week_ending).max(),
            total_cases: obs.iter().fold(0i64, |acc, o| acc.saturating_add(o.case_count)),
            threshold: self.labeled.threshold,
            at_risk_rows: obs.iter().filter(|o| o.risk_label).count(),
            clipped: self.labeled.clipped,
        }
    }
}

/// Every `*.csv` directly under `dir`, sorted by path.
pub fn discover_sources(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    // ---
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read, aggregate and label the given files.
///
/// Files that are missing or unreadable are skipped with a warning; the run
/// fails only when nothing usable remains.
pub fn prepare(
    paths: &[PathBuf],
    opts: &IngestOptions,
    disease_id: i32,
    load_date: NaiveDate,
) -> Result<PreparedRun, PipelineError> {
    // ---
    let mut batches = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "source file not found, skipped");
            skipped.push(path.display().to_string());
            continue;
        }
        match ingest::read_path(path, opts) {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "source file skipped");
                skipped.push(path.display().to_string());
            }
        }
    }

    prepare_batches(batches, skipped, disease_id, load_date)
}

/// Aggregate and label a single in-memory source (an upload).
pub fn prepare_upload(
    name: &str,
    bytes: &[u8],
    opts: &IngestOptions,
    disease_id: i32,
    load_date: NaiveDate,
) -> Result<PreparedRun, UploadError> {
    // ---
    let batch = ingest::read_source(name, bytes, opts)?;
    Ok(prepare_batches(vec![batch], Vec::new(), disease_id, load_date)?)
}

/// Merge parsed batches and label the result against one threshold.
pub fn prepare_batches(
    batches: Vec<SourceBatch>,
    skipped: Vec<String>,
    disease_id: i32,
    load_date: NaiveDate,
) -> Result<PreparedRun, PipelineError> {
    // ---
    let counts = ingest::merge(&batches);
    if batches.is_empty() || counts.is_empty() {
        return Err(PipelineError::NoUsableInput {
            files_skipped: skipped.len(),
        });
    }

    let labeled = incidence::label_batch(&counts, disease_id, load_date);

    let files = batches
        .into_iter()
        .map(|b| FileReport {
            weekly_rows: b.counts.len(),
            name: b.name,
            format: b.format,
            stats: b.stats,
        })
        .collect();

    Ok(PreparedRun {
        files,
        skipped,
        labeled,
    })
}

/// Outcome of persisting a run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub load_id: Uuid,
    pub rows_upserted: u64,
}

/// Persist a prepared run under a fresh load id.
pub async fn persist(pool: &PgPool, run: &PreparedRun) -> Result<LoadReport, sqlx::Error> {
    // ---
    let load_id = Uuid::new_v4();

    async move {
        store::upsert_regions(pool).await?;
        let rows_upserted = store::upsert_observations(pool, run.observations(), load_id).await?;

        tracing::info!(rows_upserted, "observations upserted");
        Ok(LoadReport {
            load_id,
            rows_upserted,
        })
    }
    .instrument(tracing::info_span!("load", %load_id))
    .await
}
