//! Database schema management for `epi-sentinel`.
//!
//! Ensures required tables and indexes exist before serving requests or
//! loading data. Applied once on startup by both binaries.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `disease`, `region`, `weekly_observation`, `alert` and
/// `saved_prediction` tables and seeds disease 1. Safe to call on every
/// startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS disease (
            disease_id  INTEGER PRIMARY KEY,
            name        TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO disease (disease_id, name) VALUES (1, 'Dengue')
        ON CONFLICT (disease_id) DO NOTHING;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS region (
            region_id   INTEGER PRIMARY KEY,
            name        TEXT   NOT NULL,
            population  BIGINT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Incidence precision matches the clip ceiling in `incidence`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_observation (
            id              BIGSERIAL PRIMARY KEY,
            disease_id      INTEGER       NOT NULL,
            region_id       INTEGER       NOT NULL REFERENCES region (region_id),
            week_ending     DATE          NOT NULL,
            case_count      BIGINT        NOT NULL CHECK (case_count >= 0),
            death_count     BIGINT        NOT NULL DEFAULT 0 CHECK (death_count >= 0),
            incidence_rate  NUMERIC(10,4) NOT NULL,
            risk_label      BOOLEAN       NOT NULL,
            load_date       DATE          NOT NULL,
            load_id         UUID          NOT NULL,
            UNIQUE (disease_id, region_id, week_ending)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert (
            id              SERIAL PRIMARY KEY,
            region_id       INTEGER          NOT NULL REFERENCES region (region_id),
            region_name     TEXT             NOT NULL,
            level           TEXT             NOT NULL,
            probability     DOUBLE PRECISION NOT NULL,
            expected_cases  BIGINT           NOT NULL,
            message         TEXT             NOT NULL,
            recommendations TEXT             NOT NULL,
            channel         TEXT             NOT NULL DEFAULT 'system',
            priority        TEXT             NOT NULL DEFAULT 'high',
            status          TEXT             NOT NULL DEFAULT 'active',
            created_at      TIMESTAMPTZ      NOT NULL DEFAULT now(),
            sent_at         TIMESTAMPTZ,
            resolved_at     TIMESTAMPTZ,
            resolution      TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Prediction payloads are stored as sent by the client
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS saved_prediction (
            id            SERIAL PRIMARY KEY,
            generated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            batch_name    TEXT        NOT NULL,
            region_name   TEXT        NOT NULL,
            region_id     INTEGER     REFERENCES region (region_id),
            start_date    DATE        NOT NULL,
            weeks         INTEGER     NOT NULL CHECK (weeks > 0),
            predictions   JSONB       NOT NULL,
            validation    JSONB       NOT NULL DEFAULT '[]',
            metrics       JSONB       NOT NULL DEFAULT '{}',
            created_by    TEXT        NOT NULL DEFAULT 'system'
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Indexes for the per-region history lookups and listings
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_weekly_observation_region_week
            ON weekly_observation (region_id, week_ending);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alert_status
            ON alert (status);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_saved_prediction_generated
            ON saved_prediction (generated_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
