//! Temporal aggregation of surveillance source files.
//!
//! A source CSV is classified once from its header row and dispatched to one
//! of three fixed-shape parsers:
//!
//! - [`case_level`]: one row per notified case, bucketed into weeks.
//! - [`monthly`]: one row per state with month columns, disaggregated into
//!   four synthetic weeks per month.
//! - [`weekly`]: an already-aggregated weekly series.
//!
//! Each parser yields [`WeeklyCount`]s; [`merge`] folds all batches of a run
//! into one series with at most one row per (region, week).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::IngestError;
use crate::models::WeeklyCount;

pub mod case_level;
pub mod monthly;
pub mod weekly;

// ---

/// Knobs that change how rows are interpreted.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    // ---
    /// Status code that marks a confirmed case in case-level files.
    pub confirmed_status: i64,

    /// Monthly cells above this are treated as extraction artifacts.
    pub monthly_case_ceiling: i64,

    /// Year for monthly tables; taken from the file name when `None`.
    pub year: Option<i32>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            confirmed_status: 1,
            monthly_case_ceiling: 50_000,
            year: None,
        }
    }
}

/// Layout of a source file, decided from its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    CaseLevel,
    MonthlyTable,
    WeeklySeries,
}

impl SourceFormat {
    /// Classify a header row. Case-level wins over weekly, weekly over monthly.
    pub fn classify(headers: &[String]) -> Option<Self> {
        // ---
        let has = |name: &str| column_index(headers, name).is_some();

        if case_level::REQUIRED.iter().all(|c| has(c)) {
            Some(SourceFormat::CaseLevel)
        } else if weekly::REQUIRED.iter().all(|c| has(c)) {
            Some(SourceFormat::WeeklySeries)
        } else if !monthly::month_columns(headers, monthly::state_column(headers)).is_empty() {
            Some(SourceFormat::MonthlyTable)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::CaseLevel => "case_level",
            SourceFormat::MonthlyTable => "monthly_table",
            SourceFormat::WeeklySeries => "weekly_series",
        }
    }
}

/// Row accounting for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    // ---
    pub rows_read: usize,
    /// Rows (or monthly cells) that contributed cases.
    pub rows_used: usize,
    pub invalid_date: usize,
    pub unconfirmed: usize,
    pub unmapped_region: usize,
    pub invalid_value: usize,
    /// Monthly cells above the sanity ceiling.
    pub rejected_cells: usize,
}

/// Everything one source file contributed.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    // ---
    pub name: String,
    pub format: SourceFormat,
    pub counts: Vec<WeeklyCount>,
    pub stats: IngestStats,
}

/// Open and parse a source file.
pub fn read_path(path: &Path, opts: &IngestOptions) -> Result<SourceBatch, IngestError> {
    // ---
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    read_source(&name, BufReader::new(file), opts)
}

/// Parse a source from any reader; `name` is used for messages and, for
/// monthly tables, to find the year.
pub fn read_source<R: Read>(
    name: &str,
    reader: R,
    opts: &IngestOptions,
) -> Result<SourceBatch, IngestError> {
    // ---
    let csv_err = |source| IngestError::Csv {
        name: name.to_string(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .byte_headers()
        .map_err(csv_err)?
        .iter()
        .map(decode_field)
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let format = SourceFormat::classify(&headers).ok_or_else(|| IngestError::UnknownLayout {
        name: name.to_string(),
        headers: headers.join(","),
    })?;

    let mut stats = IngestStats::default();
    let counts = match format {
        SourceFormat::CaseLevel => case_level::parse(name, &headers, &mut rdr, opts, &mut stats)?,
        SourceFormat::MonthlyTable => monthly::parse(name, &headers, &mut rdr, opts, &mut stats)?,
        SourceFormat::WeeklySeries => weekly::parse(name, &headers, &mut rdr, &mut stats)?,
    };

    tracing::info!(
        source = name,
        format = format.as_str(),
        rows_read = stats.rows_read,
        rows_used = stats.rows_used,
        weekly_rows = counts.len(),
        "source parsed"
    );
    if stats.invalid_date + stats.unmapped_region + stats.invalid_value > 0 {
        tracing::warn!(
            source = name,
            invalid_date = stats.invalid_date,
            unmapped_region = stats.unmapped_region,
            invalid_value = stats.invalid_value,
            "rows skipped"
        );
    }

    Ok(SourceBatch {
        name: name.to_string(),
        format,
        counts,
        stats,
    })
}

/// Fold the batches of one run into a single weekly series.
///
/// Case-level buckets from all files are summed and then densified per
/// region, so every Sunday between a region's first and last bucket is
/// present (zero when nothing was reported). Monthly and weekly rows are
/// added as-is. Counts that land on the same (region, week) are summed,
/// saturating at `i64::MAX`.
/// The result is sorted by region, then week.
pub fn merge(batches: &[SourceBatch]) -> Vec<WeeklyCount> {
    // ---
    let mut case_buckets: BTreeMap<(i32, NaiveDate), (i64, i64)> = BTreeMap::new();
    let mut other_buckets: BTreeMap<(i32, NaiveDate), (i64, i64)> = BTreeMap::new();

    for batch in batches {
        let target = match batch.format {
            SourceFormat::CaseLevel => &mut case_buckets,
            SourceFormat::MonthlyTable | SourceFormat::WeeklySeries => &mut other_buckets,
        };
        for c in &batch.counts {
            let slot = target.entry((c.region_id, c.week_ending)).or_default();
            slot.0 = slot.0.saturating_add(c.cases);
            slot.1 = slot.1.saturating_add(c.deaths);
        }
    }

    densify_weeks(&mut case_buckets);

    for (key, (cases, deaths)) in other_buckets {
        let slot = case_buckets.entry(key).or_default();
        slot.0 = slot.0.saturating_add(cases);
        slot.1 = slot.1.saturating_add(deaths);
    }

    case_buckets
        .into_iter()
        .map(|((region_id, week_ending), (cases, deaths))| WeeklyCount {
            region_id,
            week_ending,
            cases,
            deaths,
        })
        .collect()
}

/// Insert zero-count weeks between each region's first and last week.
fn densify_weeks(buckets: &mut BTreeMap<(i32, NaiveDate), (i64, i64)>) {
    // ---
    let mut spans: BTreeMap<i32, (NaiveDate, NaiveDate)> = BTreeMap::new();
    for &(region_id, week) in buckets.keys() {
        spans
            .entry(region_id)
            .and_modify(|(first, last)| {
                *first = (*first).min(week);
                *last = (*last).max(week);
            })
            .or_insert((week, week));
    }

    for (region_id, (first, last)) in spans {
        let mut week = first;
        while week <= last {
            buckets.entry((region_id, week)).or_default();
            week += Duration::days(7);
        }
    }
}

// --- shared field helpers

/// The Sunday on or after `date`; the week-ending convention used everywhere.
pub fn week_ending(date: NaiveDate) -> NaiveDate {
    // ---
    let offset = (7 - date.weekday().num_days_from_sunday()) % 7;
    date + Duration::days(i64::from(offset))
}

/// Parse the date shapes found in surveillance exports.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    // ---
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Parse an integer code, accepting `"3"`, `" 03 "` and `"3.0"`.
pub fn parse_int(raw: &str) -> Option<i64> {
    // ---
    let s = raw.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

/// Decode a CSV field as UTF-8, falling back to Latin-1.
pub fn decode_field(bytes: &[u8]) -> String {
    // ---
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Case-insensitive header lookup.
pub fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Field `idx` of `record`, decoded.
pub(crate) fn field(record: &csv::ByteRecord, idx: usize) -> Option<String> {
    record.get(idx).map(decode_field)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn week_ends_on_sunday() {
        // ---
        // 2024-03-04 is a Monday
        assert_eq!(week_ending(date(2024, 3, 4)), date(2024, 3, 10));
        assert_eq!(week_ending(date(2024, 3, 9)), date(2024, 3, 10));
        // A Sunday is its own week end
        assert_eq!(week_ending(date(2024, 3, 10)), date(2024, 3, 10));
        // Crosses a year boundary
        assert_eq!(week_ending(date(2024, 12, 30)), date(2025, 1, 5));
    }

    #[test]
    fn parses_common_date_shapes() {
        // ---
        assert_eq!(parse_date("2023-07-15"), Some(date(2023, 7, 15)));
        assert_eq!(parse_date("15/07/2023"), Some(date(2023, 7, 15)));
        assert_eq!(parse_date("2023-07-15 08:30:00"), Some(date(2023, 7, 15)));
        assert_eq!(parse_date("2023-02-30"), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn parses_integer_codes() {
        // ---
        assert_eq!(parse_int(" 07 "), Some(7));
        assert_eq!(parse_int("3.0"), Some(3));
        assert_eq!(parse_int("3.5"), None);
        assert_eq!(parse_int("abc"), None);
    }

    #[test]
    fn decodes_latin1_fields() {
        // ---
        assert_eq!(decode_field("Querétaro".as_bytes()), "Querétaro");
        assert_eq!(decode_field(&[b'Q', b'u', b'e', b'r', 0xE9]), "Quer\u{e9}");
    }

    #[test]
    fn classifies_each_layout() {
        // ---
        let case = headers(&["ID_REGISTRO", "FECHA_SIGN_SINTOMAS", "ENTIDAD_RES", "ESTATUS_CASO"]);
        assert_eq!(SourceFormat::classify(&case), Some(SourceFormat::CaseLevel));

        let weekly = headers(&["id_enfermedad", "id_region", "fecha_fin_semana", "casos_confirmados"]);
        assert_eq!(SourceFormat::classify(&weekly), Some(SourceFormat::WeeklySeries));

        let monthly = headers(&["Estado", "Tasa", "Total", "Ene", "Feb", "Mar"]);
        assert_eq!(SourceFormat::classify(&monthly), Some(SourceFormat::MonthlyTable));

        let other = headers(&["a", "b", "c"]);
        assert_eq!(SourceFormat::classify(&other), None);
    }

    #[test]
    fn unknown_layout_is_a_file_error() {
        // ---
        let err = read_source("x.csv", "a,b\n1,2\n".as_bytes(), &IngestOptions::default())
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownLayout { .. }));
    }

    fn batch(format: SourceFormat, counts: Vec<WeeklyCount>) -> SourceBatch {
        SourceBatch {
            name: "t".into(),
            format,
            counts,
            stats: IngestStats::default(),
        }
    }

    fn wc(region_id: i32, week_ending: NaiveDate, cases: i64) -> WeeklyCount {
        WeeklyCount {
            region_id,
            week_ending,
            cases,
            deaths: 0,
        }
    }

    #[test]
    fn merge_densifies_case_level_gaps_per_region() {
        // ---
        let b = batch(
            SourceFormat::CaseLevel,
            vec![
                wc(7, date(2024, 1, 7), 3),
                wc(7, date(2024, 1, 28), 1),
                wc(9, date(2024, 1, 14), 2),
            ],
        );
        let merged = merge(&[b]);

        let chiapas: Vec<_> = merged.iter().filter(|c| c.region_id == 7).collect();
        assert_eq!(chiapas.len(), 4);
        assert_eq!(
            chiapas.iter().map(|c| c.cases).collect::<Vec<_>>(),
            vec![3, 0, 0, 1]
        );

        // Region 9 has a single week and gains nothing from region 7's span
        let cdmx: Vec<_> = merged.iter().filter(|c| c.region_id == 9).collect();
        assert_eq!(cdmx.len(), 1);
    }

    #[test]
    fn merge_sums_shared_keys_and_keeps_synthetic_weeks_sparse() {
        // ---
        let a = batch(SourceFormat::CaseLevel, vec![wc(12, date(2024, 2, 4), 5)]);
        let b = batch(SourceFormat::CaseLevel, vec![wc(12, date(2024, 2, 4), 2)]);
        let m = batch(
            SourceFormat::MonthlyTable,
            vec![wc(12, date(2010, 1, 7), 1), wc(12, date(2010, 1, 31), 1)],
        );
        let merged = merge(&[a, b, m]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].week_ending, date(2010, 1, 7));
        assert_eq!(merged[1].week_ending, date(2010, 1, 31));
        assert_eq!(merged[2].cases, 7);
    }

    #[test]
    fn merge_saturates_huge_weekly_counts() {
        // ---
        let week = date(2024, 2, 4);
        let a = batch(SourceFormat::WeeklySeries, vec![wc(12, week, i64::MAX - 1)]);
        let b = batch(SourceFormat::WeeklySeries, vec![wc(12, week, 5)]);
        let c = batch(SourceFormat::CaseLevel, vec![wc(12, week, 3)]);
        let merged = merge(&[a, b, c]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].cases, i64::MAX);
    }
}
