//! Case-level records: one row per notified case.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;

use super::{column_index, field, parse_date, parse_int, week_ending, IngestOptions, IngestStats};
use crate::catalog;
use crate::error::IngestError;
use crate::models::WeeklyCount;

pub const SYMPTOM_DATE: &str = "FECHA_SIGN_SINTOMAS";
pub const RESIDENCE: &str = "ENTIDAD_RES";
pub const STATUS: &str = "ESTATUS_CASO";
pub const DEATH: &str = "DEFUNCION";

pub(super) const REQUIRED: [&str; 3] = [SYMPTOM_DATE, RESIDENCE, STATUS];

/// Count confirmed cases per (region, week of symptom onset).
///
/// Rows with an unparseable date, a status other than the confirmed code, or
/// a residence outside the catalog are counted in `stats` and skipped.
/// Buckets are returned sparse; [`super::merge`] fills gaps.
pub(super) fn parse<R: Read>(
    name: &str,
    headers: &[String],
    rdr: &mut csv::Reader<R>,
    opts: &IngestOptions,
    stats: &mut IngestStats,
) -> Result<Vec<WeeklyCount>, IngestError> {
    // ---
    let layout = |col: &str| {
        column_index(headers, col).ok_or_else(|| IngestError::UnknownLayout {
            name: name.to_string(),
            headers: headers.join(","),
        })
    };
    let date_idx = layout(SYMPTOM_DATE)?;
    let region_idx = layout(RESIDENCE)?;
    let status_idx = layout(STATUS)?;
    let death_idx = column_index(headers, DEATH);

    let mut buckets: BTreeMap<(i32, NaiveDate), (i64, i64)> = BTreeMap::new();

    for record in rdr.byte_records() {
        let record = record.map_err(|source| IngestError::Csv {
            name: name.to_string(),
            source,
        })?;
        stats.rows_read += 1;

        let status = field(&record, status_idx).and_then(|s| parse_int(&s));
        if status != Some(opts.confirmed_status) {
            stats.unconfirmed += 1;
            continue;
        }

        let Some(onset) = field(&record, date_idx).and_then(|s| parse_date(&s)) else {
            stats.invalid_date += 1;
            continue;
        };

        let region = field(&record, region_idx)
            .and_then(|s| parse_int(&s))
            .and_then(|id| i32::try_from(id).ok())
            .filter(|&id| catalog::lookup(id).is_some());
        let Some(region_id) = region else {
            stats.unmapped_region += 1;
            continue;
        };

        let died = death_idx
            .and_then(|idx| field(&record, idx))
            .and_then(|s| parse_int(&s))
            == Some(1);

        let slot = buckets.entry((region_id, week_ending(onset))).or_default();
        slot.0 += 1;
        if died {
            slot.1 += 1;
        }
        stats.rows_used += 1;
    }

    Ok(buckets
        .into_iter()
        .map(|((region_id, week_ending), (cases, deaths))| WeeklyCount {
            region_id,
            week_ending,
            cases,
            deaths,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    // ---
    use crate::ingest::{read_source, IngestOptions, SourceFormat};
    use chrono::NaiveDate;

    const SAMPLE: &str = "\
ID_REGISTRO,FECHA_SIGN_SINTOMAS,ENTIDAD_RES,ESTATUS_CASO,DEFUNCION
a,2024-03-04,12,1,2
b,2024-03-09,12,1,1
c,2024-03-10,12,1,2
d,2024-03-11,12,1,2
e,2024-03-05,12,2,2
f,not-a-date,12,1,2
g,2024-03-05,99,1,2
h,06/03/2024,7,1.0,2
";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn buckets_confirmed_cases_by_onset_week() {
        // ---
        let batch = read_source("cases.csv", SAMPLE.as_bytes(), &IngestOptions::default()).unwrap();
        assert_eq!(batch.format, SourceFormat::CaseLevel);

        let guerrero: Vec<_> = batch.counts.iter().filter(|c| c.region_id == 12).collect();
        assert_eq!(guerrero.len(), 2);
        // Mon 4th, Sat 9th and Sun 10th all end on Sunday the 10th
        assert_eq!(guerrero[0].week_ending, date(2024, 3, 10));
        assert_eq!(guerrero[0].cases, 3);
        assert_eq!(guerrero[0].deaths, 1);
        assert_eq!(guerrero[1].week_ending, date(2024, 3, 17));
        assert_eq!(guerrero[1].cases, 1);

        let chiapas: Vec<_> = batch.counts.iter().filter(|c| c.region_id == 7).collect();
        assert_eq!(chiapas.len(), 1);
        assert_eq!(chiapas[0].week_ending, date(2024, 3, 10));
    }

    #[test]
    fn counts_skipped_rows() {
        // ---
        let batch = read_source("cases.csv", SAMPLE.as_bytes(), &IngestOptions::default()).unwrap();
        let s = &batch.stats;
        assert_eq!(s.rows_read, 8);
        assert_eq!(s.rows_used, 5);
        assert_eq!(s.unconfirmed, 1);
        assert_eq!(s.invalid_date, 1);
        assert_eq!(s.unmapped_region, 1);
    }

    #[test]
    fn confirmed_status_is_configurable() {
        // ---
        let opts = IngestOptions {
            confirmed_status: 2,
            ..IngestOptions::default()
        };
        let batch = read_source("cases.csv", SAMPLE.as_bytes(), &opts).unwrap();
        assert_eq!(batch.stats.rows_used, 1);
        assert_eq!(batch.counts[0].week_ending, date(2024, 3, 10));
    }

    #[test]
    fn header_only_file_yields_nothing() {
        // ---
        let csv = "FECHA_SIGN_SINTOMAS,ENTIDAD_RES,ESTATUS_CASO\n";
        let batch = read_source("empty.csv", csv.as_bytes(), &IngestOptions::default()).unwrap();
        assert!(batch.counts.is_empty());
        assert_eq!(batch.stats.rows_read, 0);
    }
}
