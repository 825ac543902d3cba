//! Epidemiological early warning: weekly surveillance series, risk labels,
//! lag features and outbreak-risk inference for 32 regions.
//!
//! The batch side ([`ingest`] → [`incidence`] → [`pipeline`]) turns source
//! CSVs into a labelled weekly series. The serving side ([`features`] →
//! [`forest`] → [`inference`]) scores a region from that stored series.
//! [`routes`] exposes both over HTTP.

pub mod catalog;
pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod incidence;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
