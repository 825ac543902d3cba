//! File-based runs of the batch pipeline, no database involved.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use tempfile::TempDir;

use epi_sentinel::catalog;
use epi_sentinel::error::PipelineError;
use epi_sentinel::features::{self, FeatureColumn};
use epi_sentinel::incidence::{percentile, RISK_PERCENTILE};
use epi_sentinel::ingest::IngestOptions;
use epi_sentinel::models::{LabelledPoint, WeeklyObservation};
use epi_sentinel::pipeline;

fn load_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

const CASES_A: &str = "\
FECHA_SIGN_SINTOMAS,ENTIDAD_RES,ESTATUS_CASO,DEFUNCION
2023-01-02,12,1,2
2023-01-03,12,1,1
2023-01-30,12,1,2
2023-01-31,12,2,2
2023-01-04,7,1,2
";

const CASES_B: &str = "\
FECHA_SIGN_SINTOMAS,ENTIDAD_RES,ESTATUS_CASO
2023-01-05,12,1
2023-02-06,12,1
";

const MONTHLY: &str = "\
Estado,Ene,Feb
Guerrero,103,8
Fuente: boletin,,
";

#[test]
fn runs_mixed_sources_with_missing_file() {
    // ---
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.csv", CASES_A),
        write(dir.path(), "b.csv", CASES_B),
        write(dir.path(), "historico_2015.csv", MONTHLY),
        dir.path().join("missing.csv"),
    ];

    let run = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();
    let summary = run.summary();
    assert_eq!(summary.files_used, 3);
    assert_eq!(summary.files_skipped, 1);

    let guerrero: Vec<_> = run
        .observations()
        .iter()
        .filter(|o| o.region_id == 12)
        .collect();

    // Case-level weeks are densified from Jan 8 to Feb 12 2023 (6 Sundays)
    let weeks_2023: Vec<_> = guerrero.iter().filter(|o| o.week_ending.year() == 2023).collect();
    assert_eq!(weeks_2023.len(), 6);
    // Jan 2, 3 (file a) and Jan 5 (file b) share the week ending Jan 8
    assert_eq!(weeks_2023[0].case_count, 3);
    assert_eq!(weeks_2023[0].death_count, 1);
    assert_eq!(weeks_2023[1].case_count, 0);

    // Monthly split sums back to the published totals
    let jan_2015: i64 = guerrero
        .iter()
        .filter(|o| o.week_ending.year() == 2015 && o.week_ending.month() == 1)
        .map(|o| o.case_count)
        .sum();
    assert_eq!(jan_2015, 103);
    let feb_2015: i64 = guerrero
        .iter()
        .filter(|o| o.week_ending.year() == 2015 && o.week_ending.month() == 2)
        .map(|o| o.case_count)
        .sum();
    assert_eq!(feb_2015, 8);
}

#[test]
fn one_threshold_labels_the_whole_run() {
    // ---
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.csv", CASES_A),
        write(dir.path(), "historico_2015.csv", MONTHLY),
    ];
    let run = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();

    let rates: Vec<f64> = run.observations().iter().map(|o| o.incidence_rate).collect();
    let threshold = percentile(&rates, RISK_PERCENTILE).unwrap();
    assert_eq!(run.labeled.threshold, threshold);
    for o in run.observations() {
        assert_eq!(o.risk_label, o.incidence_rate > threshold);
    }
}

#[test]
fn rerunning_the_same_sources_is_stable() {
    // ---
    let dir = TempDir::new().unwrap();
    let files = vec![write(dir.path(), "a.csv", CASES_A)];

    let first = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();
    let second = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();
    assert_eq!(first.observations(), second.observations());
}

#[test]
fn nothing_usable_fails_the_run() {
    // ---
    let dir = TempDir::new().unwrap();
    let files = vec![
        dir.path().join("missing.csv"),
        write(dir.path(), "junk.csv", "x,y\n1,2\n"),
    ];
    let err = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap_err();
    assert!(matches!(err, PipelineError::NoUsableInput { files_skipped: 2 }));
}

#[test]
fn discovers_csv_files_in_order() {
    // ---
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b.csv", CASES_B);
    write(dir.path(), "a.CSV", CASES_A);
    write(dir.path(), "notes.txt", "ignored");
    fs::create_dir(dir.path().join("nested.csv")).unwrap();

    let found = pipeline::discover_sources(dir.path()).unwrap();
    let names: Vec<_> = found
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.CSV", "b.csv"]);
}

#[test]
fn training_lags_follow_each_region_series() {
    // ---
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.csv", CASES_A),
        write(dir.path(), "b.csv", CASES_B),
    ];
    let run = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();

    let labelled: Vec<LabelledPoint> = run
        .observations()
        .iter()
        .map(|o| LabelledPoint {
            region_id: o.region_id,
            week_ending: o.week_ending,
            case_count: o.case_count,
            incidence_rate: o.incidence_rate,
            risk_label: o.risk_label,
        })
        .collect();

    let rows = features::build_training_rows(&labelled);
    // Guerrero has 6 weeks (2 after warm-up); Chiapas a single week
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.features.region_id == 12));

    let guerrero: Vec<_> = labelled.iter().filter(|p| p.region_id == 12).collect();
    for (offset, row) in rows.iter().enumerate() {
        let i = offset + features::WARMUP_WEEKS;
        for k in 1..=4 {
            assert_eq!(row.features.cases_lag[k - 1], guerrero[i - k].case_count as f64);
        }
        assert_eq!(row.case_count, guerrero[i].case_count);
    }

    let mut out = Vec::new();
    features::export_training_csv(&rows, &Default::default(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text
        .lines()
        .next()
        .unwrap()
        .contains(FeatureColumn::RollingMean4.name()));
}

/// Cases per (region, month of the week ending), zero months dropped.
fn monthly_totals(obs: &[WeeklyObservation], year: i32) -> BTreeMap<(i32, u32), i64> {
    // ---
    let mut totals = BTreeMap::new();
    for o in obs {
        assert_eq!(o.week_ending.year(), year);
        *totals.entry((o.region_id, o.week_ending.month())).or_insert(0) += o.case_count;
    }
    totals.retain(|_, cases| *cases > 0);
    totals
}

#[test]
fn monthly_table_of_weekly_sums_round_trips() {
    // ---
    let dir = TempDir::new().unwrap();
    let regions = [6, 12, 14];
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();

    // Onsets through mid November so every week ends inside 2023
    let mut cases = String::from("FECHA_SIGN_SINTOMAS,ENTIDAD_RES,ESTATUS_CASO\n");
    for d in (0..320).step_by(2) {
        let day = start + chrono::Duration::days(d);
        let region = regions[(d as usize / 2) % regions.len()];
        for _ in 0..(d % 5) + 1 {
            cases.push_str(&format!("{},{region},1\n", day.format("%Y-%m-%d")));
        }
    }
    let files = vec![write(dir.path(), "casos.csv", &cases)];
    let weekly = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();
    let expected = monthly_totals(weekly.observations(), 2023);
    assert!(!expected.is_empty());

    let mut table = String::from("Estado,Ene,Feb,Mar,Abr,May,Jun,Jul,Ago,Sep,Oct,Nov,Dic\n");
    for id in regions {
        table.push_str(catalog::lookup(id).unwrap().name);
        for month in 1..=12 {
            let total = expected.get(&(id, month)).copied().unwrap_or(0);
            table.push_str(&format!(",{total}"));
        }
        table.push('\n');
    }
    let files = vec![write(dir.path(), "dengue_2023.csv", &table)];
    let monthly = pipeline::prepare(&files, &IngestOptions::default(), 1, load_date()).unwrap();

    assert_eq!(monthly_totals(monthly.observations(), 2023), expected);
}

