//! Typed errors for the library layers.
//!
//! Source-data problems inside a file (bad dates, unknown regions, absurd
//! counts) are not errors: they are skipped and counted. These types cover
//! whole-file, whole-run and contract failures.

use std::path::PathBuf;

use thiserror::Error;

/// A source file that cannot be used at all.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("{name}: unrecognised column layout (headers: {headers})")]
    UnknownLayout { name: String, headers: String },

    #[error("{name}: monthly table without a year in its file name")]
    MissingYear { name: String },
}

/// Whole-run failures of the aggregation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable input: {files_skipped} file(s) skipped, nothing to load")]
    NoUsableInput { files_skipped: usize },
}

/// An uploaded file that cannot be previewed or ingested.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Feature reconstruction failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("insufficient history: {available} prior week(s), {required} required")]
    InsufficientHistory { available: usize, required: usize },
}

/// Problems loading or validating a model artifact.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error("cannot read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model artifact JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model artifact is a {found}, expected a {expected}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("model expects unknown feature column '{0}'")]
    UnknownFeature(String),

    #[error("malformed tree {tree}: {reason}")]
    Malformed { tree: usize, reason: String },
}

/// Failures of a risk assessment.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{0} model is not loaded")]
    ModelUnavailable(&'static str),

    #[error("region {region_id}: {source}")]
    InsufficientHistory {
        region_id: i32,
        #[source]
        source: FeatureError,
    },
}
