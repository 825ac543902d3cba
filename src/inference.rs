//! Risk assessment for one region at one evaluation date.
//!
//! Features come from [`features::build_inference_row`], the same code path
//! used for training export.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::InferenceError;
use crate::features::{self, FeatureRow};
use crate::forest::ModelContext;
use crate::models::{NewAlert, SeriesPoint};

/// Weights of the fallback projection, most recent week first.
pub const PROJECTION_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

/// Calendar months of the rainy season.
pub const RAINY_MONTHS: std::ops::RangeInclusive<u32> = 5..=10;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Level for a probability given in percent.
    pub fn from_probability(percent: f64) -> Self {
        // ---
        if percent >= 75.0 {
            RiskLevel::Critical
        } else if percent >= 50.0 {
            RiskLevel::High
        } else if percent >= 25.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn message(self, region_name: &str) -> String {
        match self {
            RiskLevel::Critical => {
                format!("Critical outbreak risk in {region_name}: immediate action required")
            }
            RiskLevel::High => format!("High outbreak risk in {region_name}: heightened surveillance"),
            RiskLevel::Moderate => format!("Moderate outbreak risk in {region_name}: stay alert"),
            RiskLevel::Low => format!("Low outbreak risk in {region_name}: routine surveillance"),
        }
    }

    pub fn recommendations(self) -> &'static str {
        match self {
            RiskLevel::Critical => {
                "Activate the emergency response plan; intensify vector control and \
                 breeding-site elimination; prepare hospital capacity; issue a public alert."
            }
            RiskLevel::High => {
                "Step up entomological surveillance; run fumigation and larvicide \
                 campaigns; notify health units."
            }
            RiskLevel::Moderate => {
                "Keep active surveillance; promote breeding-site cleanup; review case \
                 reporting timeliness."
            }
            RiskLevel::Low => "Maintain routine surveillance and prevention messaging.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Trend::Rising
        } else if delta < 0.0 {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

/// Which model produced `expected_cases`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseModel {
    Regressor,
    WeightedAverage,
}

/// The lag values behind an assessment.
#[derive(Debug, Clone, Serialize)]
pub struct LagInputs {
    pub cases_last_week: f64,
    pub cases_four_weeks_ago: f64,
    pub incidence_last_week: f64,
    pub incidence_four_weeks_ago: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    // ---
    pub region_id: i32,
    pub region_name: String,
    pub evaluation_date: NaiveDate,
    /// Probability of the at-risk class, in percent with one decimal.
    pub probability: f64,
    pub predicted_class: u8,
    pub level: RiskLevel,
    pub message: String,
    pub recommendations: &'static str,
    pub expected_cases: i64,
    pub case_model: CaseModel,
    pub inputs: LagInputs,
    pub week_of_year: u32,
    pub month: u32,
    pub case_trend: Trend,
    pub incidence_trend: Trend,
    pub rainy_season: bool,
}

impl Assessment {
    /// Alert fields for this assessment.
    pub fn to_alert(&self) -> NewAlert {
        // ---
        NewAlert {
            region_id: self.region_id,
            region_name: self.region_name.clone(),
            level: self.level.as_str().to_string(),
            probability: self.probability,
            expected_cases: self.expected_cases,
            message: self.message.clone(),
            recommendations: self.recommendations.to_string(),
            channel: "system".to_string(),
            priority: if self.level >= RiskLevel::High {
                "high".to_string()
            } else {
                "normal".to_string()
            },
        }
    }
}

/// Weighted moving average of the last four weeks.
pub fn weighted_projection(row: &FeatureRow) -> f64 {
    row.cases_lag
        .iter()
        .zip(PROJECTION_WEIGHTS)
        .map(|(c, w)| c * w)
        .sum()
}

/// Assess `region_id` at `eval_date` from its stored history.
///
/// `history` may include rows at or after `eval_date`; they are ignored.
pub fn assess(
    models: &ModelContext,
    region_id: i32,
    region_name: &str,
    eval_date: NaiveDate,
    history: &[SeriesPoint],
) -> Result<Assessment, InferenceError> {
    // ---
    let classifier = models
        .classifier
        .as_ref()
        .ok_or(InferenceError::ModelUnavailable("risk classifier"))?;

    let row = features::build_inference_row(region_id, eval_date, history)
        .map_err(|source| InferenceError::InsufficientHistory { region_id, source })?;

    let [p0, p1] = classifier.score(&row);
    let predicted_class = u8::from(p1 > p0);
    let probability = (p1 * 1000.0).round() / 10.0;
    let level = RiskLevel::from_probability(probability);

    let (projection, case_model) = match &models.regressor {
        Some(regressor) => (regressor.score(&row), CaseModel::Regressor),
        None => (weighted_projection(&row), CaseModel::WeightedAverage),
    };
    let expected_cases = projection.max(0.0).floor() as i64;

    tracing::debug!(
        region_id,
        %eval_date,
        probability,
        predicted_class,
        expected_cases,
        "risk assessed"
    );

    Ok(Assessment {
        region_id,
        region_name: region_name.to_string(),
        evaluation_date: eval_date,
        probability,
        predicted_class,
        level,
        message: level.message(region_name),
        recommendations: level.recommendations(),
        expected_cases,
        case_model,
        inputs: LagInputs {
            cases_last_week: row.cases_lag[0],
            cases_four_weeks_ago: row.cases_lag[3],
            incidence_last_week: row.incidence_lag[0],
            incidence_four_weeks_ago: row.incidence_lag[3],
        },
        week_of_year: row.week_of_year,
        month: row.month,
        case_trend: Trend::from_delta(row.trend_4w),
        incidence_trend: Trend::from_delta(row.incidence_lag[0] - row.incidence_lag[3]),
        rainy_season: RAINY_MONTHS.contains(&eval_date.month()),
    })
}
