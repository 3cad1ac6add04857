//! Contracts for the external collaborators the engine talks to, plus the
//! in-process stand-ins used when a collaborator is not configured.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{OutbreakError, Result};
use crate::models::{FacilityLocation, TimeSeriesPoint};

#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub region_key: String,
    pub sub_region: Option<String>,
    pub since: NaiveDate,
    pub until: NaiveDate,
}

/// Historical case data, returned ascending by date. May return fewer rows
/// than the window asks for.
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    async fn fetch_series(&self, query: &SeriesQuery) -> Result<Vec<TimeSeriesPoint>>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentScore {
    pub label: String,
    pub confidence: f64,
}

/// Free text in, zero or more intent labels out.
#[async_trait]
pub trait LanguageClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<IntentScore>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub url: String,
    pub text: String,
}

/// Web content retrieval for claim corroboration.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Vec<FetchedDocument>>;
}

/// Facility lookup; enrichment only.
#[async_trait]
pub trait GeoService: Send + Sync {
    async fn facilities(&self, region_key: &str) -> Result<Vec<FacilityLocation>>;
}

/// Stand-in for a collaborator with no endpoint configured.
#[derive(Debug, Clone, Default)]
pub struct Unavailable;

#[async_trait]
impl LanguageClassifier for Unavailable {
    async fn classify(&self, _text: &str) -> Result<Vec<IntentScore>> {
        Err(OutbreakError::transient("language classifier not configured"))
    }
}

#[async_trait]
impl ContentFetcher for Unavailable {
    async fn fetch(&self, _query: &str) -> Result<Vec<FetchedDocument>> {
        Err(OutbreakError::transient("content retrieval not configured"))
    }
}

#[async_trait]
impl GeoService for Unavailable {
    async fn facilities(&self, _region_key: &str) -> Result<Vec<FacilityLocation>> {
        Err(OutbreakError::transient("geo service not configured"))
    }
}

#[async_trait]
impl HistoricalDataSource for Unavailable {
    async fn fetch_series(&self, _query: &SeriesQuery) -> Result<Vec<TimeSeriesPoint>> {
        Err(OutbreakError::transient("historical data source not configured"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvSeriesRow {
    pub date: NaiveDate,
    pub region_key: String,
    #[serde(default)]
    pub sub_region: Option<String>,
    pub raw_count: i64,
    pub population: i64,
    #[serde(default)]
    pub hospitalized: Option<i64>,
    #[serde(default)]
    pub deaths: Option<i64>,
    #[serde(default)]
    pub positivity: Option<f64>,
    #[serde(default)]
    pub source_key: Option<String>,
}

impl CsvSeriesRow {
    pub fn series_key(&self) -> String {
        series_key(&self.region_key, self.sub_region.as_deref())
    }

    pub fn into_point(self) -> TimeSeriesPoint {
        TimeSeriesPoint {
            date: self.date,
            region_key: self.region_key,
            raw_count: self.raw_count,
            population: self.population,
            hospitalized: self.hospitalized,
            deaths: self.deaths,
            positivity: self.positivity,
        }
    }
}

pub fn read_series_csv(path: &Path) -> Result<Vec<CsvSeriesRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CsvSeriesRow>() {
        let row = result?;
        if row.raw_count < 0 || row.population < 0 {
            return Err(OutbreakError::input(format!(
                "negative count for {} on {}",
                row.region_key, row.date
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn series_key(region_key: &str, sub_region: Option<&str>) -> String {
    match sub_region {
        Some(sub) => format!("{}/{}", region_key.trim(), sub.trim()).to_lowercase(),
        None => region_key.trim().to_lowercase(),
    }
}

/// Series held in memory, keyed case-insensitively by region (and
/// sub-region). Duplicate dates keep the last row seen.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    series: HashMap<String, Vec<TimeSeriesPoint>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut source = Self::new();
        for row in read_series_csv(path)? {
            let key = row.series_key();
            source.push(key, row.into_point());
        }
        source.normalize();
        Ok(source)
    }

    pub fn with_series(mut self, points: Vec<TimeSeriesPoint>) -> Self {
        for point in points {
            let key = series_key(&point.region_key, None);
            self.push(key, point);
        }
        self.normalize();
        self
    }

    pub fn regions(&self) -> usize {
        self.series.len()
    }

    fn push(&mut self, key: String, point: TimeSeriesPoint) {
        self.series.entry(key).or_default().push(point);
    }

    fn normalize(&mut self) {
        for points in self.series.values_mut() {
            points.sort_by_key(|p| p.date);
            // dedup_by keeps the first of a run; reverse so the last row wins
            points.reverse();
            points.dedup_by_key(|p| p.date);
            points.reverse();
        }
    }
}

#[async_trait]
impl HistoricalDataSource for MemorySource {
    async fn fetch_series(&self, query: &SeriesQuery) -> Result<Vec<TimeSeriesPoint>> {
        let key = series_key(&query.region_key, query.sub_region.as_deref());
        let points = self
            .series
            .get(&key)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.date >= query.since && p.date <= query.until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(points)
    }
}
