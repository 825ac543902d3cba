//! Pre-aggregated weekly series, one row per (region, week).

use std::io::Read;

use super::{column_index, field, parse_date, parse_int, IngestStats};
use crate::catalog;
use crate::error::IngestError;
use crate::models::WeeklyCount;

pub const REGION: &str = "id_region";
pub const WEEK_END: &str = "fecha_fin_semana";
pub const CASES: &str = "casos_confirmados";
pub const DEATHS: &str = "defunciones";

pub(super) const REQUIRED: [&str; 3] = [REGION, WEEK_END, CASES];

/// Rows are taken at face value: the week-ending date is not snapped to a
/// Sunday and no gaps are filled.
pub(super) fn parse<R: Read>(
    name: &str,
    headers: &[String],
    rdr: &mut csv::Reader<R>,
    stats: &mut IngestStats,
) -> Result<Vec<WeeklyCount>, IngestError> {
    // ---
    let layout = |col: &str| {
        column_index(headers, col).ok_or_else(|| IngestError::UnknownLayout {
            name: name.to_string(),
            headers: headers.join(","),
        })
    };
    let region_idx = layout(REGION)?;
    let week_idx = layout(WEEK_END)?;
    let cases_idx = layout(CASES)?;
    let deaths_idx = column_index(headers, DEATHS);

    let mut counts = Vec::new();

    for record in rdr.byte_records() {
        let record = record.map_err(|source| IngestError::Csv {
            name: name.to_string(),
            source,
        })?;
        stats.rows_read += 1;

        let region = field(&record, region_idx)
            .and_then(|s| parse_int(&s))
            .and_then(|id| i32::try_from(id).ok())
            .filter(|&id| catalog::lookup(id).is_some());
        let Some(region_id) = region else {
            stats.unmapped_region += 1;
            continue;
        };

        let Some(week_ending) = field(&record, week_idx).and_then(|s| parse_date(&s)) else {
            stats.invalid_date += 1;
            continue;
        };

        let cases = field(&record, cases_idx).and_then(|s| parse_int(&s));
        let Some(cases) = cases.filter(|&c| c >= 0) else {
            stats.invalid_value += 1;
            continue;
        };

        let deaths = deaths_idx
            .and_then(|idx| field(&record, idx))
            .and_then(|s| parse_int(&s))
            .filter(|&d| d >= 0)
            .unwrap_or(0);

        counts.push(WeeklyCount {
            region_id,
            week_ending,
            cases,
            deaths,
        });
        stats.rows_used += 1;
    }

    Ok(counts)
}
