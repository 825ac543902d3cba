//! Incidence rates and batch-wide risk labels.

use chrono::NaiveDate;

use crate::catalog;
use crate::models::{WeeklyCount, WeeklyObservation};

/// Largest value the `NUMERIC(10,4)` incidence column can hold.
pub const INCIDENCE_CEILING: f64 = 999_999.9999;

/// Quantile of batch incidence above which a week is labelled at-risk.
pub const RISK_PERCENTILE: f64 = 0.75;

/// Cases per 100,000 inhabitants.
pub fn incidence_rate(cases: i64, population: i64) -> f64 {
    // ---
    if population <= 0 {
        return 0.0;
    }
    cases as f64 / population as f64 * 100_000.0
}

/// Quantile `q` of `values` with linear interpolation between closest ranks.
///
/// Returns `None` for an empty slice. A single value is its own quantile.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    // ---
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// A run's observations labelled against one shared threshold.
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    // ---
    pub observations: Vec<WeeklyObservation>,
    /// The p75 incidence of this batch; zero when the batch is empty.
    pub threshold: f64,
    /// Rows whose incidence was clipped to [`INCIDENCE_CEILING`].
    pub clipped: usize,
}

/// Compute incidence and risk labels for every count in the batch.
///
/// The threshold is taken once over the whole batch, so labels are
/// comparable across regions and years. Labels use the unclipped
/// incidence; the stored value is clipped afterwards. With very little
/// history the label degenerates (a single row is never above itself).
pub fn label_batch(counts: &[WeeklyCount], disease_id: i32, load_date: NaiveDate) -> LabeledBatch {
    // ---
    let rated: Vec<(&WeeklyCount, f64)> = counts
        .iter()
        .filter_map(|c| match catalog::lookup(c.region_id) {
            Some(info) => Some((c, incidence_rate(c.cases, info.population))),
            None => {
                tracing::warn!(region_id = c.region_id, "no population for region, row dropped");
                None
            }
        })
        .collect();

    let rates: Vec<f64> = rated.iter().map(|(_, rate)| *rate).collect();
    let threshold = percentile(&rates, RISK_PERCENTILE).unwrap_or(0.0);

    let mut clipped = 0;
    let observations = rated
        .into_iter()
        .map(|(c, rate)| {
            let risk_label = rate > threshold;
            let incidence_rate = if rate > INCIDENCE_CEILING {
                tracing::warn!(
                    region_id = c.region_id,
                    week_ending = %c.week_ending,
                    incidence = rate,
                    "incidence clipped to storage ceiling"
                );
                clipped += 1;
                INCIDENCE_CEILING
            } else {
                rate
            };
            WeeklyObservation {
                disease_id,
                region_id: c.region_id,
                week_ending: c.week_ending,
                case_count: c.cases,
                death_count: c.deaths,
                incidence_rate,
                risk_label,
                load_date,
            }
        })
        .collect();

    tracing::info!(threshold, clipped, "risk threshold computed");

    LabeledBatch {
        observations,
        threshold,
        clipped,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn wc(region_id: i32, cases: i64) -> WeeklyCount {
        WeeklyCount {
            region_id,
            week_ending: date(2024, 1, 7),
            cases,
            deaths: 0,
        }
    }

    #[test]
    fn rate_per_hundred_thousand() {
        // ---
        assert!((incidence_rate(50, 1_000_000) - 5.0).abs() < 1e-12);
        assert_eq!(incidence_rate(0, 1_000_000), 0.0);
        assert_eq!(incidence_rate(10, 0), 0.0);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        // ---
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.75), Some(3.25));
        assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0, 5.0], 0.75), Some(4.0));
        assert_eq!(percentile(&[7.5], 0.75), Some(7.5));
        assert_eq!(percentile(&[], 0.75), None);
    }

    #[test]
    fn labels_against_one_batch_threshold() {
        // ---
        // Colima (775,100) and Chiapas (6,000,100): incidence depends on
        // population, but the threshold is shared.
        let counts = vec![wc(6, 1), wc(6, 10), wc(6, 40), wc(7, 10), wc(7, 400)];
        let batch = label_batch(&counts, 1, date(2024, 6, 1));

        let rates: Vec<f64> = batch.observations.iter().map(|o| o.incidence_rate).collect();
        let expected = percentile(&rates, RISK_PERCENTILE).unwrap();
        assert_eq!(batch.threshold, expected);

        for obs in &batch.observations {
            assert_eq!(obs.risk_label, obs.incidence_rate > batch.threshold);
            let pop = catalog::lookup(obs.region_id).unwrap().population;
            assert!((obs.incidence_rate - incidence_rate(obs.case_count, pop)).abs() < 1e-9);
        }
        assert_eq!(batch.observations.iter().filter(|o| o.risk_label).count(), 1);
    }

    #[test]
    fn single_row_is_never_at_risk() {
        // ---
        let batch = label_batch(&[wc(12, 20)], 1, date(2024, 6, 1));
        assert_eq!(batch.threshold, batch.observations[0].incidence_rate);
        assert!(!batch.observations[0].risk_label);
    }

    #[test]
    fn clips_absurd_incidence() {
        // ---
        // 20M cases in Colima is far past the storage ceiling
        let batch = label_batch(&[wc(6, 20_000_000), wc(6, 1)], 1, date(2024, 6, 1));
        assert_eq!(batch.clipped, 1);
        assert_eq!(batch.observations[0].incidence_rate, INCIDENCE_CEILING);
        assert!(batch.observations[0].risk_label);
        assert!(batch.observations.iter().all(|o| o.incidence_rate <= INCIDENCE_CEILING));
    }

    #[test]
    fn empty_batch_has_zero_threshold() {
        // ---
        let batch = label_batch(&[], 1, date(2024, 6, 1));
        assert!(batch.observations.is_empty());
        assert_eq!(batch.threshold, 0.0);
    }
}
