//! Queries against the epidemiological store.
//!
//! Every function takes the pool (or a transaction) and returns
//! `sqlx::Error`; callers decide how to surface it. Incidence is stored as
//! `NUMERIC(10,4)` and read back as `DOUBLE PRECISION`.

use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::catalog::REGIONS;
use crate::models::{
    AlertRecord, AlertStatus, DatasetStats, Disease, EpiWeekProfile, HighCaseWeek, LabelledPoint,
    MonthTrend, NewAlert, NewSavedPrediction, Region, RegionRanking, RegionReportTotals,
    RegionSummary, ReportTotals, SavedPrediction, SavedPredictionSummary, SeriesPoint,
    WeeklyObservation, YearCount, YearMonthCases, YearTrend,
};

/// Rows per multi-row INSERT; 9 binds each keeps well under the
/// 65535-parameter limit.
const UPSERT_CHUNK: usize = 1_000;

/// Tolerance used when matching an evaluation date to a stored week.
pub const NEAREST_WEEK_TOLERANCE_DAYS: i32 = 4;

// --- catalog

/// Upsert the 32-region catalog.
pub async fn upsert_regions(pool: &PgPool) -> Result<u64, sqlx::Error> {
    // ---
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO region (region_id, name, population) ");
    qb.push_values(REGIONS.iter(), |mut b, r| {
        b.push_bind(r.id).push_bind(r.name).push_bind(r.population);
    });
    qb.push(
        " ON CONFLICT (region_id) DO UPDATE SET \
           name = EXCLUDED.name, population = EXCLUDED.population",
    );
    let done = qb.build().execute(pool).await?;
    Ok(done.rows_affected())
}

pub async fn list_regions(pool: &PgPool) -> Result<Vec<Region>, sqlx::Error> {
    sqlx::query_as::<_, Region>("SELECT region_id, name, population FROM region ORDER BY region_id")
        .fetch_all(pool)
        .await
}

pub async fn list_diseases(pool: &PgPool) -> Result<Vec<Disease>, sqlx::Error> {
    sqlx::query_as::<_, Disease>("SELECT disease_id, name FROM disease ORDER BY disease_id")
        .fetch_all(pool)
        .await
}

// --- weekly series

/// Upsert a labelled batch in one transaction.
///
/// Keys already present get their counts, incidence, label, load date and
/// load id replaced, so reloading the same source is idempotent.
pub async fn upsert_observations(
    pool: &PgPool,
    observations: &[WeeklyObservation],
    load_id: Uuid,
) -> Result<u64, sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;
    let mut affected = 0;

    for chunk in observations.chunks(UPSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO weekly_observation (disease_id, region_id, week_ending, case_count, \
             death_count, incidence_rate, risk_label, load_date, load_id) ",
        );
        qb.push_values(chunk, |mut b, o| {
            b.push_bind(o.disease_id)
                .push_bind(o.region_id)
                .push_bind(o.week_ending)
                .push_bind(o.case_count)
                .push_bind(o.death_count)
                .push_bind(o.incidence_rate)
                .push_unseparated("::NUMERIC(10,4)")
                .push_bind(o.risk_label)
                .push_bind(o.load_date)
                .push_bind(load_id);
        });
        qb.push(
            " ON CONFLICT (disease_id, region_id, week_ending) DO UPDATE SET \
               case_count = EXCLUDED.case_count, \
               death_count = EXCLUDED.death_count, \
               incidence_rate = EXCLUDED.incidence_rate, \
               risk_label = EXCLUDED.risk_label, \
               load_date = EXCLUDED.load_date, \
               load_id = EXCLUDED.load_id",
        );
        affected += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}

/// The `limit` most recent weeks strictly before `before`, oldest first.
pub async fn recent_before(
    pool: &PgPool,
    disease_id: i32,
    region_id: i32,
    before: NaiveDate,
    limit: i64,
) -> Result<Vec<SeriesPoint>, sqlx::Error> {
    // ---
    let mut points = sqlx::query_as::<_, SeriesPoint>(
        r#"
        SELECT week_ending, case_count, incidence_rate::DOUBLE PRECISION AS incidence_rate
        FROM weekly_observation
        WHERE disease_id = $1 AND region_id = $2 AND week_ending < $3
        ORDER BY week_ending DESC
        LIMIT $4
        "#,
    )
    .bind(disease_id)
    .bind(region_id)
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    points.reverse();
    Ok(points)
}

/// Most recent stored week for a region.
pub async fn latest_week(
    pool: &PgPool,
    disease_id: i32,
    region_id: i32,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    // ---
    sqlx::query_scalar::<_, Option<NaiveDate>>(
        "SELECT MAX(week_ending) FROM weekly_observation WHERE disease_id = $1 AND region_id = $2",
    )
    .bind(disease_id)
    .bind(region_id)
    .fetch_one(pool)
    .await
}

/// The stored week closest to `date`, if one lies within `tolerance_days`.
pub async fn nearest_observation(
    pool: &PgPool,
    disease_id: i32,
    region_id: i32,
    date: NaiveDate,
    tolerance_days: i32,
) -> Result<Option<SeriesPoint>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, SeriesPoint>(
        r#"
        SELECT week_ending, case_count, incidence_rate::DOUBLE PRECISION AS incidence_rate
        FROM weekly_observation
        WHERE disease_id = $1 AND region_id = $2
          AND week_ending BETWEEN $3 - $4 AND $3 + $4
        ORDER BY ABS(week_ending - $3), week_ending
        LIMIT 1
        "#,
    )
    .bind(disease_id)
    .bind(region_id)
    .bind(date)
    .bind(tolerance_days)
    .fetch_optional(pool)
    .await
}

/// Full labelled series for training export, ordered by region then week.
pub async fn training_series(
    pool: &PgPool,
    disease_id: i32,
    since_year: Option<i32>,
) -> Result<Vec<LabelledPoint>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, LabelledPoint>(
        r#"
        SELECT region_id, week_ending, case_count,
               incidence_rate::DOUBLE PRECISION AS incidence_rate, risk_label
        FROM weekly_observation
        WHERE disease_id = $1
          AND ($2::INT IS NULL OR EXTRACT(YEAR FROM week_ending)::INT >= $2)
        ORDER BY region_id, week_ending
        "#,
    )
    .bind(disease_id)
    .bind(since_year)
    .fetch_all(pool)
    .await
}

// --- statistics

pub async fn dataset_stats(pool: &PgPool, disease_id: i32) -> Result<DatasetStats, sqlx::Error> {
    // ---
    let mut stats = sqlx::query_as::<_, DatasetStats>(
        r#"
        SELECT COUNT(*)                             AS total_rows,
               MIN(week_ending)                     AS first_week,
               MAX(week_ending)                     AS last_week,
               COALESCE(SUM(case_count), 0)::BIGINT AS total_cases,
               COUNT(DISTINCT region_id)            AS regions_with_data,
               MAX(load_date)                       AS last_load
        FROM weekly_observation
        WHERE disease_id = $1
        "#,
    )
    .bind(disease_id)
    .fetch_one(pool)
    .await?;

    stats.years = sqlx::query_as::<_, YearCount>(
        r#"
        SELECT EXTRACT(YEAR FROM week_ending)::INT AS year,
               COUNT(*)                            AS rows,
               SUM(case_count)::BIGINT             AS cases
        FROM weekly_observation
        WHERE disease_id = $1
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await?;

    Ok(stats)
}

pub async fn region_summaries(
    pool: &PgPool,
    disease_id: i32,
) -> Result<Vec<RegionSummary>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, RegionSummary>(
        r#"
        SELECT r.region_id,
               r.name,
               COUNT(*)                                        AS weeks,
               SUM(o.case_count)::BIGINT                       AS total_cases,
               MIN(o.week_ending)                              AS first_week,
               MAX(o.week_ending)                              AS last_week,
               MAX(o.incidence_rate)::DOUBLE PRECISION         AS max_incidence,
               COUNT(*) FILTER (WHERE o.risk_label)            AS at_risk_weeks
        FROM weekly_observation o
        JOIN region r ON r.region_id = o.region_id
        WHERE o.disease_id = $1
        GROUP BY r.region_id, r.name
        ORDER BY r.region_id
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await
}

/// Total cases and regions with data, for the dashboard.
pub async fn case_totals(pool: &PgPool, disease_id: i32) -> Result<(i64, i64), sqlx::Error> {
    // ---
    sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COALESCE(SUM(case_count), 0)::BIGINT, COUNT(DISTINCT region_id)
        FROM weekly_observation
        WHERE disease_id = $1
        "#,
    )
    .bind(disease_id)
    .fetch_one(pool)
    .await
}

// --- administrative clears

/// Years accepted by [`clear_year`] callers.
pub const CLEARABLE_YEARS: RangeInclusive<i32> = 1900..=2100;

pub async fn clear_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let done = sqlx::query("DELETE FROM weekly_observation")
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}

pub async fn clear_year(pool: &PgPool, year: i32) -> Result<u64, sqlx::Error> {
    // ---
    let done = sqlx::query("DELETE FROM weekly_observation WHERE EXTRACT(YEAR FROM week_ending)::INT = $1")
        .bind(year)
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}

// --- alerts

const ALERT_COLUMNS: &str = "id, region_id, region_name, level, probability, expected_cases, \
     message, recommendations, channel, priority, status, created_at, sent_at, resolved_at, resolution";

/// Record an alert; `sent` alerts are stamped with `sent_at`.
pub async fn insert_alert(
    pool: &PgPool,
    alert: &NewAlert,
    status: AlertStatus,
) -> Result<i32, sqlx::Error> {
    // ---
    let sent_at: Option<DateTime<Utc>> = (status == AlertStatus::Sent).then(Utc::now);

    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO alert (
            region_id, region_name, level, probability, expected_cases,
            message, recommendations, channel, priority, status, sent_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(alert.region_id)
    .bind(&alert.region_name)
    .bind(&alert.level)
    .bind(alert.probability)
    .bind(alert.expected_cases)
    .bind(&alert.message)
    .bind(&alert.recommendations)
    .bind(&alert.channel)
    .bind(&alert.priority)
    .bind(status.as_str())
    .bind(sent_at)
    .fetch_one(pool)
    .await
}

pub async fn count_active_alerts(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM alert WHERE status IN ('active', 'sent')")
        .fetch_one(pool)
        .await
}

/// Unresolved alerts, most severe first, then newest.
pub async fn active_alerts(pool: &PgPool) -> Result<Vec<AlertRecord>, sqlx::Error> {
    // ---
    let sql = format!(
        r#"
        SELECT {ALERT_COLUMNS}
        FROM alert
        WHERE status IN ('active', 'sent')
        ORDER BY CASE level
                   WHEN 'critical' THEN 0
                   WHEN 'high' THEN 1
                   WHEN 'moderate' THEN 2
                   ELSE 3
                 END,
                 created_at DESC
        "#
    );
    sqlx::query_as::<_, AlertRecord>(&sql).fetch_all(pool).await
}

/// The latest 100 alerts in any state.
pub async fn alert_history(pool: &PgPool) -> Result<Vec<AlertRecord>, sqlx::Error> {
    // ---
    let sql = format!("SELECT {ALERT_COLUMNS} FROM alert ORDER BY created_at DESC, id DESC LIMIT 100");
    sqlx::query_as::<_, AlertRecord>(&sql).fetch_all(pool).await
}

/// Mark an alert resolved. `None` when the id does not exist.
pub async fn resolve_alert(
    pool: &PgPool,
    id: i32,
    resolution: Option<&str>,
) -> Result<Option<AlertRecord>, sqlx::Error> {
    // ---
    let sql = format!(
        r#"
        UPDATE alert
        SET status = 'resolved', resolved_at = now(), resolution = $2
        WHERE id = $1
        RETURNING {ALERT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, AlertRecord>(&sql)
        .bind(id)
        .bind(resolution)
        .fetch_optional(pool)
        .await
}

// --- reports

/// Regions listed in the national ranking.
pub const REPORT_TOP_REGIONS: i64 = 10;

/// High-case weeks listed in the national report.
pub const REPORT_HIGH_CASE_WEEKS: i64 = 20;

pub async fn report_totals(pool: &PgPool, disease_id: i32) -> Result<ReportTotals, sqlx::Error> {
    // ---
    sqlx::query_as::<_, ReportTotals>(
        r#"
        SELECT COUNT(*)                                       AS total_rows,
               COALESCE(SUM(case_count), 0)::BIGINT           AS total_cases,
               COALESCE(AVG(case_count), 0)::DOUBLE PRECISION AS avg_weekly_cases,
               COALESCE(MAX(case_count), 0)::BIGINT           AS max_weekly_cases,
               MIN(week_ending)                               AS first_week,
               MAX(week_ending)                               AS last_week,
               COUNT(DISTINCT region_id)                      AS regions,
               COUNT(DISTINCT EXTRACT(YEAR FROM week_ending)) AS years
        FROM weekly_observation
        WHERE disease_id = $1
        "#,
    )
    .bind(disease_id)
    .fetch_one(pool)
    .await
}

/// Regions with the most cases, highest first.
pub async fn top_regions(pool: &PgPool, disease_id: i32) -> Result<Vec<RegionRanking>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, RegionRanking>(
        r#"
        SELECT r.region_id,
               r.name,
               SUM(o.case_count)::BIGINT             AS total_cases,
               AVG(o.case_count)::DOUBLE PRECISION   AS avg_weekly_cases,
               MAX(o.case_count)::BIGINT             AS max_weekly_cases,
               COUNT(*)                              AS weeks
        FROM weekly_observation o
        JOIN region r ON r.region_id = o.region_id
        WHERE o.disease_id = $1
        GROUP BY r.region_id, r.name
        ORDER BY total_cases DESC, r.region_id
        LIMIT $2
        "#,
    )
    .bind(disease_id)
    .bind(REPORT_TOP_REGIONS)
    .fetch_all(pool)
    .await
}

pub async fn yearly_trend(pool: &PgPool, disease_id: i32) -> Result<Vec<YearTrend>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, YearTrend>(
        r#"
        SELECT EXTRACT(YEAR FROM week_ending)::INT AS year,
               SUM(case_count)::BIGINT             AS total_cases,
               AVG(case_count)::DOUBLE PRECISION   AS avg_weekly_cases,
               COUNT(DISTINCT region_id)           AS regions_affected
        FROM weekly_observation
        WHERE disease_id = $1
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await
}

/// Monthly totals over the 24 months ending at the latest stored week.
pub async fn recent_monthly_trend(
    pool: &PgPool,
    disease_id: i32,
) -> Result<Vec<MonthTrend>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, MonthTrend>(
        r#"
        SELECT to_char(week_ending, 'YYYY-MM')   AS month,
               SUM(case_count)::BIGINT           AS total_cases,
               AVG(case_count)::DOUBLE PRECISION AS avg_weekly_cases
        FROM weekly_observation
        WHERE disease_id = $1
          AND week_ending > (
              SELECT MAX(week_ending) FROM weekly_observation WHERE disease_id = $1
          ) - INTERVAL '24 months'
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await
}

/// Mean and total cases per ISO week number, across all years.
pub async fn epi_week_profile(
    pool: &PgPool,
    disease_id: i32,
) -> Result<Vec<EpiWeekProfile>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, EpiWeekProfile>(
        r#"
        SELECT EXTRACT(WEEK FROM week_ending)::INT AS epi_week,
               AVG(case_count)::DOUBLE PRECISION   AS avg_cases,
               SUM(case_count)::BIGINT             AS total_cases
        FROM weekly_observation
        WHERE disease_id = $1
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await
}

/// Cases per month for the latest stored year and the three before it.
pub async fn year_comparison(
    pool: &PgPool,
    disease_id: i32,
) -> Result<Vec<YearMonthCases>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, YearMonthCases>(
        r#"
        SELECT EXTRACT(YEAR FROM week_ending)::INT  AS year,
               EXTRACT(MONTH FROM week_ending)::INT AS month,
               SUM(case_count)::BIGINT              AS cases
        FROM weekly_observation
        WHERE disease_id = $1
          AND EXTRACT(YEAR FROM week_ending) >= (
              SELECT EXTRACT(YEAR FROM MAX(week_ending)) - 3
              FROM weekly_observation
              WHERE disease_id = $1
          )
        GROUP BY 1, 2
        ORDER BY 1, 2
        "#,
    )
    .bind(disease_id)
    .fetch_all(pool)
    .await
}

/// Weeks above twice the mean weekly count, largest first.
pub async fn high_case_weeks(
    pool: &PgPool,
    disease_id: i32,
) -> Result<Vec<HighCaseWeek>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, HighCaseWeek>(
        r#"
        SELECT o.region_id,
               r.name,
               o.week_ending,
               EXTRACT(WEEK FROM o.week_ending)::INT AS epi_week,
               o.case_count,
               o.incidence_rate::DOUBLE PRECISION    AS incidence_rate
        FROM weekly_observation o
        JOIN region r ON r.region_id = o.region_id
        WHERE o.disease_id = $1
          AND o.case_count > (
              SELECT AVG(case_count) * 2 FROM weekly_observation WHERE disease_id = $1
          )
        ORDER BY o.case_count DESC, o.week_ending DESC
        LIMIT $2
        "#,
    )
    .bind(disease_id)
    .bind(REPORT_HIGH_CASE_WEEKS)
    .fetch_all(pool)
    .await
}

pub async fn region_report_totals(
    pool: &PgPool,
    disease_id: i32,
    region_id: i32,
) -> Result<RegionReportTotals, sqlx::Error> {
    // ---
    sqlx::query_as::<_, RegionReportTotals>(
        r#"
        SELECT COUNT(*)                                           AS weeks,
               COALESCE(SUM(case_count), 0)::BIGINT               AS total_cases,
               COALESCE(AVG(case_count), 0)::DOUBLE PRECISION     AS avg_weekly_cases,
               COALESCE(MAX(case_count), 0)::BIGINT               AS max_weekly_cases,
               COALESCE(AVG(incidence_rate), 0)::DOUBLE PRECISION AS avg_incidence
        FROM weekly_observation
        WHERE disease_id = $1 AND region_id = $2
        "#,
    )
    .bind(disease_id)
    .bind(region_id)
    .fetch_one(pool)
    .await
}

/// Every month with data for one region, oldest first.
pub async fn region_monthly_trend(
    pool: &PgPool,
    disease_id: i32,
    region_id: i32,
) -> Result<Vec<MonthTrend>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, MonthTrend>(
        r#"
        SELECT to_char(week_ending, 'YYYY-MM')   AS month,
               SUM(case_count)::BIGINT           AS total_cases,
               AVG(case_count)::DOUBLE PRECISION AS avg_weekly_cases
        FROM weekly_observation
        WHERE disease_id = $1 AND region_id = $2
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(disease_id)
    .bind(region_id)
    .fetch_all(pool)
    .await
}

// --- saved predictions

pub async fn insert_saved_prediction(
    pool: &PgPool,
    prediction: &NewSavedPrediction,
    batch_name: &str,
    generated_at: DateTime<Utc>,
) -> Result<i32, sqlx::Error> {
    // ---
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO saved_prediction (
            generated_at, batch_name, region_name, region_id, start_date, weeks,
            predictions, validation, metrics, created_by
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(generated_at)
    .bind(batch_name)
    .bind(&prediction.region_name)
    .bind(prediction.region_id)
    .bind(prediction.start_date)
    .bind(prediction.weeks)
    .bind(Json(&prediction.predictions))
    .bind(Json(&prediction.validation))
    .bind(Json(&prediction.metrics))
    .bind(&prediction.created_by)
    .fetch_one(pool)
    .await
}

/// The latest 100 saved predictions, without payloads.
pub async fn saved_prediction_history(
    pool: &PgPool,
) -> Result<Vec<SavedPredictionSummary>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, SavedPredictionSummary>(
        r#"
        SELECT id, generated_at, batch_name, region_name, region_id, start_date, weeks
        FROM saved_prediction
        ORDER BY generated_at DESC, id DESC
        LIMIT 100
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn saved_prediction(pool: &PgPool, id: i32) -> Result<Option<SavedPrediction>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, SavedPrediction>(
        r#"
        SELECT id, generated_at, batch_name, region_name, region_id, start_date, weeks,
               predictions, validation, metrics, created_by
        FROM saved_prediction
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Delete a saved prediction; `false` when the id does not exist.
pub async fn delete_saved_prediction(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    // ---
    let done = sqlx::query("DELETE FROM saved_prediction WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

