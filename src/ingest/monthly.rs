//! Published monthly tables: one row per state, one column per month.
//!
//! Monthly totals carry no weekly shape, so each month is split into four
//! synthetic weeks dated on days 7, 14 and 21 and the last day of the month.
//! The first three get `floor(total / 4)` and the fourth takes the
//! remainder, so the split always sums back to the total.

use std::io::Read;

use chrono::{Datelike, NaiveDate};

use super::{field, IngestOptions, IngestStats};
use crate::catalog;
use crate::error::IngestError;
use crate::models::WeeklyCount;

/// Spanish month abbreviations, in calendar order.
const MONTHS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

/// Index of the state-name column: the first header mentioning "estado",
/// else the first column.
pub(super) fn state_column(headers: &[String]) -> usize {
    // ---
    headers
        .iter()
        .position(|h| h.to_lowercase().contains("estado"))
        .unwrap_or(0)
}

/// `(column index, month number)` for every header that names a month.
pub(super) fn month_columns(headers: &[String], state_idx: usize) -> Vec<(usize, u32)> {
    // ---
    let mut found: Vec<(usize, u32)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if idx == state_idx {
            continue;
        }
        let lower = header.to_lowercase();
        let month = MONTHS
            .iter()
            .position(|abbr| lower.starts_with(abbr))
            .map(|m| m as u32 + 1);
        if let Some(month) = month {
            if !found.iter().any(|&(_, m)| m == month) {
                found.push((idx, month));
            }
        }
    }
    found
}

/// First standalone four-digit year in 1900..=2100 found in `name`.
pub fn year_from_name(name: &str) -> Option<i32> {
    // ---
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i - start == 4 {
            if let Ok(year) = name[start..i].parse::<i32>() {
                if (1900..=2100).contains(&year) {
                    return Some(year);
                }
            }
        }
    }
    None
}

/// Split a month total into four dated weekly counts.
///
/// Returns `None` when the month is not a calendar month.
pub fn disaggregate_month(year: i32, month: u32, total: i64) -> Option<[(NaiveDate, i64); 4]> {
    // ---
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_month.pred_opt()?;

    let share = total / 4;
    let rest = total - share * 3;

    Some([
        (first.with_day(7)?, share),
        (first.with_day(14)?, share),
        (first.with_day(21)?, share),
        (last, rest),
    ])
}

/// Parse a numeric cell: spaces and thousands separators are dropped,
/// decimals truncated, anything unreadable is zero.
fn parse_cell(raw: &str) -> i64 {
    // ---
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v.trunc() as i64,
        _ => 0,
    }
}

/// Footnote and summary rows carry no state data.
fn is_footnote(label: &str) -> bool {
    // ---
    let lower = label.trim().to_lowercase();
    lower.starts_with("total")
        || lower.starts_with("fuente")
        || lower.contains("tasa*")
        || lower.contains("habitantes")
}

pub(super) fn parse<R: Read>(
    name: &str,
    headers: &[String],
    rdr: &mut csv::Reader<R>,
    opts: &IngestOptions,
    stats: &mut IngestStats,
) -> Result<Vec<WeeklyCount>, IngestError> {
    // ---
    let year = opts
        .year
        .or_else(|| year_from_name(name))
        .ok_or_else(|| IngestError::MissingYear {
            name: name.to_string(),
        })?;

    let state_idx = state_column(headers);
    let months = month_columns(headers, state_idx);

    let mut counts = Vec::new();

    for record in rdr.byte_records() {
        let record = record.map_err(|source| IngestError::Csv {
            name: name.to_string(),
            source,
        })?;
        stats.rows_read += 1;

        let label = field(&record, state_idx).unwrap_or_default();
        if label.trim().is_empty() || is_footnote(&label) {
            continue;
        }

        let Some(region_id) = catalog::resolve_name(&label) else {
            tracing::debug!(source = name, state = %label, "unmapped state name");
            stats.unmapped_region += 1;
            continue;
        };

        for &(idx, month) in &months {
            let total = field(&record, idx).map(|s| parse_cell(&s)).unwrap_or(0);
            if total <= 0 {
                continue;
            }
            if total > opts.monthly_case_ceiling {
                tracing::warn!(
                    source = name,
                    state = %label,
                    month,
                    total,
                    ceiling = opts.monthly_case_ceiling,
                    "monthly cell above ceiling, skipped"
                );
                stats.rejected_cells += 1;
                continue;
            }
            let Some(weeks) = disaggregate_month(year, month, total) else {
                stats.invalid_date += 1;
                continue;
            };
            counts.extend(weeks.into_iter().map(|(week_ending, cases)| WeeklyCount {
                region_id,
                week_ending,
                cases,
                deaths: 0,
            }));
            stats.rows_used += 1;
        }
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::ingest::{read_source, SourceFormat};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn splits_month_into_four_weeks() {
        // ---
        let weeks = disaggregate_month(2023, 1, 103).unwrap();
        assert_eq!(
            weeks,
            [
                (date(2023, 1, 7), 25),
                (date(2023, 1, 14), 25),
                (date(2023, 1, 21), 25),
                (date(2023, 1, 31), 28),
            ]
        );
        assert_eq!(weeks.iter().map(|w| w.1).sum::<i64>(), 103);
    }

    #[test]
    fn small_totals_land_in_last_week() {
        // ---
        let weeks = disaggregate_month(2024, 2, 3).unwrap();
        assert_eq!(weeks.map(|w| w.1), [0, 0, 0, 3]);
        // Leap year February
        assert_eq!(weeks[3].0, date(2024, 2, 29));
    }

    #[test]
    fn december_ends_on_the_31st() {
        // ---
        let weeks = disaggregate_month(2019, 12, 8).unwrap();
        assert_eq!(weeks[3].0, date(2019, 12, 31));
        assert!(disaggregate_month(2019, 13, 8).is_none());
    }

    #[test]
    fn finds_year_in_file_name() {
        // ---
        assert_eq!(year_from_name("dengue_mensual_2019.csv"), Some(2019));
        assert_eq!(year_from_name("tabla3_2015_v2.csv"), Some(2015));
        // Longer digit runs are not years
        assert_eq!(year_from_name("export_20190101.csv"), None);
        assert_eq!(year_from_name("casos_1776.csv"), None);
        assert_eq!(year_from_name("casos.csv"), None);
    }

    #[test]
    fn cleans_numeric_cells() {
        // ---
        assert_eq!(parse_cell("1,234"), 1234);
        assert_eq!(parse_cell(" 12 "), 12);
        assert_eq!(parse_cell("7.9"), 7);
        assert_eq!(parse_cell("-"), 0);
        assert_eq!(parse_cell(""), 0);
    }

    const TABLE: &str = "\
Estado,Tasa,Ene,Feb,Mar
Guerrero 1,10.5,103,0,\"1,200\"
Colima,3.2,60000,4,
Atlantis,1,5,5,5
Total,99,999,999,999
Fuente: SINAVE,,,,
";

    #[test]
    fn parses_table_with_footnotes_and_ceiling() {
        // ---
        let batch = read_source(
            "dengue_2019.csv",
            TABLE.as_bytes(),
            &crate::ingest::IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(batch.format, SourceFormat::MonthlyTable);

        let guerrero: Vec<_> = batch.counts.iter().filter(|c| c.region_id == 12).collect();
        // January and March only; February is zero
        assert_eq!(guerrero.len(), 8);
        assert_eq!(guerrero.iter().map(|c| c.cases).sum::<i64>(), 1303);
        assert_eq!(guerrero[0].week_ending, date(2019, 1, 7));

        let colima: Vec<_> = batch.counts.iter().filter(|c| c.region_id == 6).collect();
        assert_eq!(colima.iter().map(|c| c.cases).sum::<i64>(), 4);

        assert_eq!(batch.stats.rejected_cells, 1);
        assert_eq!(batch.stats.unmapped_region, 1);
    }

    #[test]
    fn missing_year_fails_the_file() {
        // ---
        let err = read_source(
            "mensual.csv",
            TABLE.as_bytes(),
            &crate::ingest::IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::MissingYear { .. }));

        let opts = crate::ingest::IngestOptions {
            year: Some(2020),
            ..Default::default()
        };
        let batch = read_source("mensual.csv", TABLE.as_bytes(), &opts).unwrap();
        assert!(batch.counts.iter().all(|c| c.week_ending.year() == 2020));
    }
}
