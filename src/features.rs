//! Lag features shared by training-set export and live inference.
//!
//! [`lagged_row`] is the only place a feature vector is computed. Column
//! names and their order live in [`FeatureColumn`]; model artifacts are
//! validated against it at load time.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::catalog::RegionEncoder;
use crate::error::FeatureError;
use crate::models::{LabelledPoint, SeriesPoint};

/// Prior weeks a row needs before all lags are defined.
pub const WARMUP_WEEKS: usize = 4;

// ---

/// One model input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureColumn {
    CasesLag1,
    CasesLag2,
    CasesLag3,
    CasesLag4,
    IncidenceLag1,
    IncidenceLag2,
    IncidenceLag3,
    IncidenceLag4,
    RollingMean4,
    Trend4,
    PctChange,
    WeekOfYear,
    Month,
    RegionCode,
}

impl FeatureColumn {
    /// Every column, in canonical order.
    pub const ALL: [FeatureColumn; 14] = [
        FeatureColumn::CasesLag1,
        FeatureColumn::CasesLag2,
        FeatureColumn::CasesLag3,
        FeatureColumn::CasesLag4,
        FeatureColumn::IncidenceLag1,
        FeatureColumn::IncidenceLag2,
        FeatureColumn::IncidenceLag3,
        FeatureColumn::IncidenceLag4,
        FeatureColumn::RollingMean4,
        FeatureColumn::Trend4,
        FeatureColumn::PctChange,
        FeatureColumn::WeekOfYear,
        FeatureColumn::Month,
        FeatureColumn::RegionCode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::CasesLag1 => "cases_lag_1w",
            FeatureColumn::CasesLag2 => "cases_lag_2w",
            FeatureColumn::CasesLag3 => "cases_lag_3w",
            FeatureColumn::CasesLag4 => "cases_lag_4w",
            FeatureColumn::IncidenceLag1 => "ti_lag_1w",
            FeatureColumn::IncidenceLag2 => "ti_lag_2w",
            FeatureColumn::IncidenceLag3 => "ti_lag_3w",
            FeatureColumn::IncidenceLag4 => "ti_lag_4w",
            FeatureColumn::RollingMean4 => "cases_rolling_mean_4w",
            FeatureColumn::Trend4 => "trend_4w",
            FeatureColumn::PctChange => "pct_change",
            FeatureColumn::WeekOfYear => "week_of_year",
            FeatureColumn::Month => "month",
            FeatureColumn::RegionCode => "region_code",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Input columns of the risk classifier.
pub const CLASSIFIER_COLUMNS: [FeatureColumn; 14] = FeatureColumn::ALL;

/// Input columns of the case-count regressor.
pub const REGRESSOR_COLUMNS: [FeatureColumn; 11] = [
    FeatureColumn::CasesLag1,
    FeatureColumn::CasesLag2,
    FeatureColumn::CasesLag3,
    FeatureColumn::CasesLag4,
    FeatureColumn::IncidenceLag1,
    FeatureColumn::IncidenceLag2,
    FeatureColumn::RollingMean4,
    FeatureColumn::Trend4,
    FeatureColumn::WeekOfYear,
    FeatureColumn::Month,
    FeatureColumn::RegionCode,
];

/// Column names of a contract, in order.
pub fn column_names(columns: &[FeatureColumn]) -> Vec<&'static str> {
    columns.iter().map(|c| c.name()).collect()
}

/// Features for one region at one week, computed from prior weeks only.
///
/// `cases_lag[0]` is the week before `week_ending`, `cases_lag[3]` four
/// weeks before. The region is kept as an id and encoded at projection
/// time so one row can feed models with different encoders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    // ---
    pub region_id: i32,
    pub week_ending: NaiveDate,
    pub cases_lag: [f64; 4],
    pub incidence_lag: [f64; 4],
    pub rolling_mean_4w: f64,
    pub trend_4w: f64,
    pub pct_change: f64,
    pub week_of_year: u32,
    pub month: u32,
}

impl FeatureRow {
    pub fn value(&self, column: FeatureColumn, encoder: &RegionEncoder) -> f64 {
        // ---
        match column {
            FeatureColumn::CasesLag1 => self.cases_lag[0],
            FeatureColumn::CasesLag2 => self.cases_lag[1],
            FeatureColumn::CasesLag3 => self.cases_lag[2],
            FeatureColumn::CasesLag4 => self.cases_lag[3],
            FeatureColumn::IncidenceLag1 => self.incidence_lag[0],
            FeatureColumn::IncidenceLag2 => self.incidence_lag[1],
            FeatureColumn::IncidenceLag3 => self.incidence_lag[2],
            FeatureColumn::IncidenceLag4 => self.incidence_lag[3],
            FeatureColumn::RollingMean4 => self.rolling_mean_4w,
            FeatureColumn::Trend4 => self.trend_4w,
            FeatureColumn::PctChange => self.pct_change,
            FeatureColumn::WeekOfYear => f64::from(self.week_of_year),
            FeatureColumn::Month => f64::from(self.month),
            FeatureColumn::RegionCode => encoder.encode(self.region_id),
        }
    }

    /// The vector a model trained on `columns` expects.
    pub fn project(&self, columns: &[FeatureColumn], encoder: &RegionEncoder) -> Vec<f64> {
        columns.iter().map(|&c| self.value(c, encoder)).collect()
    }
}

/// Build the feature row for `week_ending` from the region's prior series.
///
/// `prior` must be the region's observations strictly before
/// `week_ending`, oldest first; only the last four are used.
pub fn lagged_row(
    region_id: i32,
    week_ending: NaiveDate,
    prior: &[SeriesPoint],
) -> Result<FeatureRow, FeatureError> {
    // ---
    if prior.len() < WARMUP_WEEKS {
        return Err(FeatureError::InsufficientHistory {
            available: prior.len(),
            required: WARMUP_WEEKS,
        });
    }

    let recent = &prior[prior.len() - WARMUP_WEEKS..];
    let mut cases_lag = [0.0; 4];
    let mut incidence_lag = [0.0; 4];
    for (k, point) in recent.iter().rev().enumerate() {
        cases_lag[k] = point.case_count as f64;
        incidence_lag[k] = point.incidence_rate;
    }

    let rolling_mean_4w = cases_lag.iter().sum::<f64>() / WARMUP_WEEKS as f64;
    let trend_4w = cases_lag[0] - cases_lag[3];
    let pct_change = if cases_lag[1] == 0.0 {
        0.0
    } else {
        let v = (cases_lag[0] - cases_lag[1]) / cases_lag[1];
        if v.is_finite() {
            v
        } else {
            0.0
        }
    };

    Ok(FeatureRow {
        region_id,
        week_ending,
        cases_lag,
        incidence_lag,
        rolling_mean_4w,
        trend_4w,
        pct_change,
        week_of_year: week_ending.iso_week().week(),
        month: week_ending.month(),
    })
}

/// Feature row for scoring `eval_date` from whatever history was fetched.
///
/// History at or after `eval_date` is ignored.
pub fn build_inference_row(
    region_id: i32,
    eval_date: NaiveDate,
    history: &[SeriesPoint],
) -> Result<FeatureRow, FeatureError> {
    // ---
    let mut prior: Vec<SeriesPoint> = history
        .iter()
        .filter(|p| p.week_ending < eval_date)
        .copied()
        .collect();
    prior.sort_by_key(|p| p.week_ending);
    lagged_row(region_id, eval_date, &prior)
}

/// One labelled training example.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    // ---
    pub features: FeatureRow,
    pub risk_label: bool,
    pub case_count: i64,
}

/// Training rows for every region, warm-up rows dropped.
///
/// Series are grouped by region and ordered by week, so lags never cross
/// region boundaries. Output is ordered by region, then week.
pub fn build_training_rows(series: &[LabelledPoint]) -> Vec<TrainingRow> {
    // ---
    let mut by_region: BTreeMap<i32, Vec<&LabelledPoint>> = BTreeMap::new();
    for p in series {
        by_region.entry(p.region_id).or_default().push(p);
    }

    let mut rows = Vec::new();
    for (region_id, mut labelled) in by_region {
        labelled.sort_by_key(|p| p.week_ending);
        let points: Vec<SeriesPoint> = labelled.iter().map(|p| p.point()).collect();

        for (i, current) in labelled.iter().enumerate().skip(WARMUP_WEEKS) {
            if let Ok(features) = lagged_row(region_id, current.week_ending, &points[..i]) {
                rows.push(TrainingRow {
                    features,
                    risk_label: current.risk_label,
                    case_count: current.case_count,
                });
            }
        }
    }
    rows
}

/// The column contract an external trainer must honour.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnContract {
    // ---
    pub classifier: Vec<&'static str>,
    pub regressor: Vec<&'static str>,
    pub region_classes: Vec<String>,
}

impl ColumnContract {
    pub fn new(encoder: &RegionEncoder) -> Self {
        Self {
            classifier: column_names(&CLASSIFIER_COLUMNS),
            regressor: column_names(&REGRESSOR_COLUMNS),
            region_classes: encoder.classes().to_vec(),
        }
    }
}

/// Write training rows as CSV: `region_id, week_ending`, every feature
/// column in canonical order, then `risk_label` and `case_count`.
pub fn export_training_csv<W: Write>(
    rows: &[TrainingRow],
    encoder: &RegionEncoder,
    writer: W,
) -> Result<(), csv::Error> {
    // ---
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec!["region_id", "week_ending"];
    header.extend(column_names(&FeatureColumn::ALL));
    header.extend(["risk_label", "case_count"]);
    out.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.features.region_id.to_string(),
            row.features.week_ending.to_string(),
        ];
        record.extend(
            row.features
                .project(&FeatureColumn::ALL, encoder)
                .into_iter()
                .map(|v| v.to_string()),
        );
        record.push(u8::from(row.risk_label).to_string());
        record.push(row.case_count.to_string());
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(())
}
