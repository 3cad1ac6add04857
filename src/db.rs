use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::collaborators::{read_series_csv, HistoricalDataSource, SeriesQuery};
use crate::error::Result;
use crate::models::TimeSeriesPoint;
use crate::trend;

const SEED_DAYS: i64 = 42;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_region(
    pool: &PgPool,
    region_key: &str,
    sub_region: Option<&str>,
    population: i64,
) -> std::result::Result<Uuid, sqlx::Error> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO outbreak.regions (id, region_key, key_norm, sub_region, population)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (key_norm, sub_region) DO UPDATE
        SET region_key = EXCLUDED.region_key, population = EXCLUDED.population
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(region_key.trim())
    .bind(region_key.trim().to_lowercase())
    .bind(sub_region.map(str::trim).unwrap_or(""))
    .bind(population)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn insert_count(
    pool: &PgPool,
    region_id: Uuid,
    point: &TimeSeriesPoint,
    source_key: &str,
) -> std::result::Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO outbreak.case_counts
        (id, region_id, observed_on, raw_count, population, hospitalized, deaths, positivity, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(region_id)
    .bind(point.date)
    .bind(point.raw_count)
    .bind(point.population)
    .bind(point.hospitalized)
    .bind(point.deaths)
    .bind(point.positivity)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Six weeks of daily counts ending today: California accelerating, Texas
/// flat. Source keys are per region and date, so re-seeding is a no-op.
pub fn seed_series(end: NaiveDate) -> Vec<TimeSeriesPoint> {
    let mut points = Vec::new();
    for day in 0..SEED_DAYS {
        let date = end - Duration::days(SEED_DAYS - 1 - day);
        let weekday_dip = if day % 7 == 5 || day % 7 == 6 { 0.85 } else { 1.0 };

        let california = (180.0 * 1.035f64.powi(day as i32) * weekday_dip).round() as i64;
        points.push(TimeSeriesPoint {
            date,
            region_key: "California".to_string(),
            raw_count: california,
            population: 39_000_000,
            hospitalized: Some(california * 9 / 100),
            deaths: Some(california / 120),
            positivity: Some(0.06 + 0.001 * day as f64),
        });

        let texas = (240.0 * weekday_dip).round() as i64 + (day % 3);
        points.push(TimeSeriesPoint {
            date,
            region_key: "Texas".to_string(),
            raw_count: texas,
            population: 30_000_000,
            hospitalized: Some(texas * 7 / 100),
            deaths: Some(texas / 150),
            positivity: Some(0.05),
        });
    }
    points
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for point in seed_series(trend::today()) {
        let region_id = upsert_region(pool, &point.region_key, None, point.population).await?;
        let source_key = format!("seed-{}-{}", point.region_key.to_lowercase(), point.date);
        if insert_count(pool, region_id, &point, &source_key).await? {
            inserted += 1;
        }
    }
    info!(inserted, "seed data loaded");
    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let rows = read_series_csv(csv_path)
        .with_context(|| format!("failed to read {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for row in rows {
        let region_id =
            upsert_region(pool, &row.region_key, row.sub_region.as_deref(), row.population).await?;
        let source_key = row
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_count(pool, region_id, &row.into_point(), &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Historical data source over the `outbreak` schema.
#[derive(Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoricalDataSource for PgSource {
    async fn fetch_series(&self, query: &SeriesQuery) -> Result<Vec<TimeSeriesPoint>> {
        let rows = sqlx::query(
            "SELECT r.region_key, c.observed_on, c.raw_count, c.population, \
             c.hospitalized, c.deaths, c.positivity \
             FROM outbreak.case_counts c \
             JOIN outbreak.regions r ON r.id = c.region_id \
             WHERE r.key_norm = $1 AND r.sub_region = $2 \
             AND c.observed_on >= $3 AND c.observed_on <= $4 \
             ORDER BY c.observed_on",
        )
        .bind(query.region_key.trim().to_lowercase())
        .bind(query.sub_region.as_deref().map(str::trim).unwrap_or(""))
        .bind(query.since)
        .bind(query.until)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(TimeSeriesPoint {
                region_key: row.try_get("region_key")?,
                date: row.try_get("observed_on")?,
                raw_count: row.try_get("raw_count")?,
                population: row.try_get("population")?,
                hospitalized: row.try_get("hospitalized")?,
                deaths: row.try_get("deaths")?,
                positivity: row.try_get("positivity")?,
            });
        }
        debug!(region = %query.region_key, rows = points.len(), "series loaded");
        Ok(points)
    }
}
