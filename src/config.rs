use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{OutbreakError, Result};
use crate::models::{Audience, Classification};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_in_flight: usize,
    pub task_timeout_secs: u64,
    pub global_deadline_secs: u64,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub lookback_days: i64,
    pub forecast_days: i64,
    pub national_region: String,
    pub default_facility_density: f64,
    pub facility_density: HashMap<String, f64>,
    pub unit_costs: UnitCosts,
    pub claims: ClaimSettings,
    pub router: RouterSettings,
    pub endpoints: Endpoints,
    pub guidance_overrides: Vec<GuidanceOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            task_timeout_secs: 10,
            global_deadline_secs: 30,
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
            lookback_days: 28,
            forecast_days: 14,
            national_region: "US".to_string(),
            default_facility_density: 1.0,
            facility_density: HashMap::new(),
            unit_costs: UnitCosts::default(),
            claims: ClaimSettings::default(),
            router: RouterSettings::default(),
            endpoints: Endpoints::default(),
            guidance_overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnitCosts {
    pub icu_bed: f64,
    pub ppe_unit: f64,
    pub test: f64,
}

impl Default for UnitCosts {
    fn default() -> Self {
        Self {
            icu_bed: 15_000.0,
            ppe_unit: 0.85,
            test: 25.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimSettings {
    /// Fractional widening of the observed range.
    pub relative_tolerance: f64,
    /// Percentage points added on both sides of the observed range.
    pub absolute_tolerance: f64,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 0.5,
            absolute_tolerance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub min_confidence: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { min_confidence: 0.5 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub classifier: Option<String>,
    pub content_search: Option<String>,
    pub geo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuidanceOverride {
    pub audience: Audience,
    pub classification: Classification,
    pub text: String,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| OutbreakError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(OutbreakError::config("max_in_flight must be at least 1"));
        }
        if self.task_timeout_secs == 0 || self.global_deadline_secs == 0 {
            return Err(OutbreakError::config("timeouts must be positive"));
        }
        if self.lookback_days < 14 {
            return Err(OutbreakError::config(
                "lookback_days must cover two seven-day windows",
            ));
        }
        let costs = &self.unit_costs;
        if costs.icu_bed < 0.0 || costs.ppe_unit < 0.0 || costs.test < 0.0 {
            return Err(OutbreakError::config("unit costs must be non-negative"));
        }
        if self.claims.relative_tolerance < 0.0 || self.claims.absolute_tolerance < 0.0 {
            return Err(OutbreakError::config("claim tolerances must be non-negative"));
        }
        if self.default_facility_density <= 0.0
            || self.facility_density.values().any(|d| *d <= 0.0)
        {
            return Err(OutbreakError::config("facility density must be positive"));
        }
        if self.national_region.trim().is_empty() {
            return Err(OutbreakError::config("national_region must not be empty"));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_secs(self.global_deadline_secs)
    }

    pub fn facility_density_for(&self, region_key: &str) -> f64 {
        self.facility_density
            .get(region_key)
            .copied()
            .unwrap_or(self.default_facility_density)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.task_timeout(), Duration::from_secs(10));
        assert_eq!(config.global_deadline(), Duration::from_secs(30));
        assert_eq!(config.cache.ttl_secs, 900);
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            max_in_flight = 2
            national_region = "CA"

            [facility_density]
            California = 1.4

            [[guidance_overrides]]
            audience = "SCHOOL"
            classification = "STABLE"
            text = "Keep windows open."
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.task_timeout_secs, 10);
        assert_eq!(config.facility_density_for("California"), 1.4);
        assert_eq!(config.facility_density_for("Texas"), 1.0);
        assert_eq!(config.guidance_overrides.len(), 1);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = Config {
            max_in_flight: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(OutbreakError::Config(_))));
    }
}
