//! Data models shared by the pipeline, the store and the API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---

/// Region row as stored in the `region` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Region {
    // ---
    pub region_id: i32,
    pub name: String,
    pub population: i64,
}

/// Disease row as stored in the `disease` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Disease {
    pub disease_id: i32,
    pub name: String,
}

/// Aggregator output: cases counted for one region in one week.
///
/// Every input shape (case-level, monthly table, weekly series) is reduced to
/// a stream of these before incidence and risk labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WeeklyCount {
    // ---
    pub region_id: i32,
    pub week_ending: NaiveDate,
    pub cases: i64,
    pub deaths: i64,
}

/// A labelled weekly observation, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyObservation {
    // ---
    pub disease_id: i32,
    pub region_id: i32,
    pub week_ending: NaiveDate,
    pub case_count: i64,
    pub death_count: i64,
    pub incidence_rate: f64,
    pub risk_label: bool,
    pub load_date: NaiveDate,
}

/// The slice of a stored observation the feature builder needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeriesPoint {
    // ---
    pub week_ending: NaiveDate,
    pub case_count: i64,
    pub incidence_rate: f64,
}

impl From<&WeeklyObservation> for SeriesPoint {
    fn from(obs: &WeeklyObservation) -> Self {
        SeriesPoint {
            week_ending: obs.week_ending,
            case_count: obs.case_count,
            incidence_rate: obs.incidence_rate,
        }
    }
}

/// Stored observation joined with its label, as read back for training export.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LabelledPoint {
    // ---
    pub region_id: i32,
    pub week_ending: NaiveDate,
    pub case_count: i64,
    pub incidence_rate: f64,
    pub risk_label: bool,
}

impl LabelledPoint {
    pub fn point(&self) -> SeriesPoint {
        SeriesPoint {
            week_ending: self.week_ending,
            case_count: self.case_count,
            incidence_rate: self.incidence_rate,
        }
    }
}

/// Whole-dataset statistics for one disease.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct DatasetStats {
    // ---
    pub total_rows: i64,
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
    pub total_cases: i64,
    pub regions_with_data: i64,
    pub last_load: Option<NaiveDate>,
    #[sqlx(skip)]
    pub years: Vec<YearCount>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct YearCount {
    pub year: i32,
    pub rows: i64,
    pub cases: i64,
}

/// Per-region roll-up of the stored series.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RegionSummary {
    // ---
    pub region_id: i32,
    pub name: String,
    pub weeks: i64,
    pub total_cases: i64,
    pub first_week: NaiveDate,
    pub last_week: NaiveDate,
    pub max_incidence: f64,
    pub at_risk_weeks: i64,
}

/// Alert lifecycle states stored in `alert.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Sent,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Sent => "sent",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// Fields needed to record an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    // ---
    pub region_id: i32,
    pub region_name: String,
    pub level: String,
    pub probability: f64,
    pub expected_cases: i64,
    pub message: String,
    pub recommendations: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_channel() -> String {
    "system".to_string()
}

fn default_priority() -> String {
    "high".to_string()
}

/// Alert row as returned by the API.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRecord {
    // ---
    pub id: i32,
    pub region_id: i32,
    pub region_name: String,
    pub level: String,
    pub probability: f64,
    pub expected_cases: i64,
    pub message: String,
    pub recommendations: String,
    pub channel: String,
    pub priority: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolution: Option<String>,
}

// --- reports

/// Whole-series figures heading the epidemiological report.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct ReportTotals {
    // ---
    pub total_rows: i64,
    pub total_cases: i64,
    pub avg_weekly_cases: f64,
    pub max_weekly_cases: i64,
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
    pub regions: i64,
    pub years: i64,
}

/// A region ranked by total cases.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RegionRanking {
    pub region_id: i32,
    pub name: String,
    pub total_cases: i64,
    pub avg_weekly_cases: f64,
    pub max_weekly_cases: i64,
    pub weeks: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct YearTrend {
    pub year: i32,
    pub total_cases: i64,
    pub avg_weekly_cases: f64,
    pub regions_affected: i64,
}

/// Cases in one calendar month; `month` is `YYYY-MM`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MonthTrend {
    pub month: String,
    pub total_cases: i64,
    pub avg_weekly_cases: f64,
}

/// Historical profile of one ISO week number across all years.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EpiWeekProfile {
    pub epi_week: i32,
    pub avg_cases: f64,
    pub total_cases: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct YearMonthCases {
    pub year: i32,
    pub month: i32,
    pub cases: i64,
}

/// A stored week whose count is more than twice the series mean.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HighCaseWeek {
    pub region_id: i32,
    pub name: String,
    pub week_ending: NaiveDate,
    pub epi_week: i32,
    pub case_count: i64,
    pub incidence_rate: f64,
}

/// Figures for one region's report.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct RegionReportTotals {
    // ---
    pub weeks: i64,
    pub total_cases: i64,
    pub avg_weekly_cases: f64,
    pub max_weekly_cases: i64,
    pub avg_incidence: f64,
}

// --- saved predictions

/// A prediction batch submitted for safekeeping.
///
/// The payloads are opaque to the service and stored as JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSavedPrediction {
    // ---
    pub batch_name: Option<String>,
    pub region_name: String,
    pub region_id: Option<i32>,
    pub start_date: NaiveDate,
    pub weeks: i32,
    pub predictions: serde_json::Value,
    #[serde(default = "empty_array")]
    pub validation: serde_json::Value,
    #[serde(default = "empty_object")]
    pub metrics: serde_json::Value,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn empty_array() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_created_by() -> String {
    "system".to_string()
}

/// Listing entry for a saved prediction, without payloads.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SavedPredictionSummary {
    // ---
    pub id: i32,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub batch_name: String,
    pub region_name: String,
    pub region_id: Option<i32>,
    pub start_date: NaiveDate,
    pub weeks: i32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SavedPrediction {
    // ---
    pub id: i32,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub batch_name: String,
    pub region_name: String,
    pub region_id: Option<i32>,
    pub start_date: NaiveDate,
    pub weeks: i32,
    pub predictions: sqlx::types::Json<serde_json::Value>,
    pub validation: sqlx::types::Json<serde_json::Value>,
    pub metrics: sqlx::types::Json<serde_json::Value>,
    pub created_by: String,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn series_point_keeps_observation_values() {
        // ---
        let obs = WeeklyObservation {
            disease_id: 1,
            region_id: 12,
            week_ending: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            case_count: 40,
            death_count: 0,
            incidence_rate: 1.074,
            risk_label: true,
            load_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        };
        let p = SeriesPoint::from(&obs);
        assert_eq!(p.week_ending, obs.week_ending);
        assert_eq!(p.case_count, 40);
        assert_eq!(p.incidence_rate, 1.074);
    }

    #[test]
    fn new_alert_defaults_channel_and_priority() {
        // ---
        let alert: NewAlert = serde_json::from_str(
            r#"{"region_id": 12, "region_name": "Guerrero", "level": "high",
                "probability": 61.5, "expected_cases": 90,
                "message": "m", "recommendations": "r"}"#,
        )
        .unwrap();
        assert_eq!(alert.channel, "system");
        assert_eq!(alert.priority, "high");
        assert_eq!(AlertStatus::Sent.as_str(), "sent");
    }

    #[test]
    fn saved_prediction_payloads_default() {
        // ---
        let p: NewSavedPrediction = serde_json::from_str(
            r#"{"region_name": "Colima", "start_date": "2024-03-10", "weeks": 4,
                "predictions": [{"week": 1, "cases": 12}]}"#,
        )
        .unwrap();
        assert_eq!(p.validation, serde_json::json!([]));
        assert_eq!(p.metrics, serde_json::json!({}));
        assert_eq!(p.created_by, "system");
        assert!(p.batch_name.is_none());
    }
}
