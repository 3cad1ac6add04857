use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::collaborators::GeoService;
use crate::config::UnitCosts;
use crate::error::{OutbreakError, Result};
use crate::models::{ResourceEstimate, TrendSnapshot};

const ICU_BEDS_PER_100K: f64 = 25.0;
const DAILY_TESTS_PER_100K: f64 = 300.0;
const BASELINE_UTILIZATION: f64 = 0.8;
const PPE_UNITS_PER_PATIENT_DAY: f64 = 26.0;

const ICU_SENSITIVITY: f64 = 2.0;
const TESTING_SENSITIVITY: f64 = 3.0;
const PPE_SENSITIVITY: f64 = 2.0;

#[async_trait]
pub trait ResourceEstimation: Send + Sync {
    async fn estimate(
        &self,
        snapshot: &TrendSnapshot,
        population: i64,
        facility_density: f64,
    ) -> Result<ResourceEstimate>;
}

pub struct ResourcePlanner {
    unit_costs: UnitCosts,
    forecast_days: i64,
    geo: Option<Arc<dyn GeoService>>,
}

impl ResourcePlanner {
    pub fn new(unit_costs: UnitCosts, forecast_days: i64) -> Self {
        Self {
            unit_costs,
            forecast_days,
            geo: None,
        }
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoService>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Numeric projection only; never touches the geo collaborator.
    pub fn project(
        &self,
        snapshot: &TrendSnapshot,
        population: i64,
        facility_density: f64,
    ) -> Result<ResourceEstimate> {
        if population <= 0 {
            return Err(OutbreakError::input(format!(
                "population for {} must be positive",
                snapshot.region_key
            )));
        }
        if !(facility_density.is_finite() && facility_density > 0.0) {
            return Err(OutbreakError::config(format!(
                "facility density for {} must be positive",
                snapshot.region_key
            )));
        }

        let per_100k = population as f64 / 100_000.0;
        let probability = f64::from(snapshot.outbreak_probability) / 100.0;
        let demand = |sensitivity: f64| 1.0 + probability * sensitivity;
        let weeks = self.forecast_days.max(0) as f64 / 7.0;
        let compounding = (1.0 + snapshot.growth_rate).max(0.0).powf(weeks);

        let occupied_icu = ICU_BEDS_PER_100K * per_100k * facility_density * BASELINE_UTILIZATION;
        let projected_icu_beds = (occupied_icu * demand(ICU_SENSITIVITY) * compounding).round();

        let baseline_tests = DAILY_TESTS_PER_100K * per_100k * facility_density;
        let projected_testing_capacity =
            (baseline_tests * demand(TESTING_SENSITIVITY) * compounding).round();

        // weekly supply for the projected ICU census
        let projected_ppe_units =
            (projected_icu_beds * PPE_UNITS_PER_PATIENT_DAY * 7.0 * demand(PPE_SENSITIVITY)).round();

        let cost_estimate = projected_icu_beds * self.unit_costs.icu_bed
            + projected_ppe_units * self.unit_costs.ppe_unit
            + projected_testing_capacity * self.unit_costs.test;

        Ok(ResourceEstimate {
            region_key: snapshot.region_key.clone(),
            projected_icu_beds,
            projected_ppe_units,
            projected_testing_capacity,
            cost_estimate,
            funding_tier: funding_tier(cost_estimate).to_string(),
            facilities: Vec::new(),
        })
    }
}

#[async_trait]
impl ResourceEstimation for ResourcePlanner {
    async fn estimate(
        &self,
        snapshot: &TrendSnapshot,
        population: i64,
        facility_density: f64,
    ) -> Result<ResourceEstimate> {
        let mut estimate = self.project(snapshot, population, facility_density)?;
        if let Some(geo) = &self.geo {
            match geo.facilities(&snapshot.region_key).await {
                Ok(facilities) => estimate.facilities = facilities,
                Err(e) => warn!(region = %snapshot.region_key, error = %e, "facility lookup failed"),
            }
        }
        Ok(estimate)
    }
}

pub fn funding_tier(cost_estimate: f64) -> &'static str {
    if cost_estimate < 100_000.0 {
        "Standard operational budget"
    } else if cost_estimate < 500_000.0 {
        "Local emergency funds"
    } else if cost_estimate < 1_000_000.0 {
        "State emergency allocation"
    } else {
        "Federal emergency funding request"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, FacilityLocation};
    use crate::collaborators::Unavailable;
    use chrono::NaiveDate;

    struct FixedGeo;

    #[async_trait]
    impl GeoService for FixedGeo {
        async fn facilities(&self, region_key: &str) -> Result<Vec<FacilityLocation>> {
            Ok(vec![FacilityLocation {
                name: format!("{region_key} General"),
                kind: "hospital".to_string(),
                latitude: 33.7,
                longitude: -84.4,
            }])
        }
    }

    fn snapshot(probability: u8, growth_rate: f64) -> TrendSnapshot {
        TrendSnapshot {
            region_key: "Georgia".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            seven_day_avg: 20.0,
            prior_seven_day_avg: 20.0,
            growth_rate,
            classification: Classification::Stable,
            outbreak_probability: probability,
            estimated: false,
        }
    }

    #[test]
    fn stable_projection_matches_baseline_arithmetic() {
        let planner = ResourcePlanner::new(UnitCosts::default(), 14);
        let estimate = planner.project(&snapshot(30, 0.0), 1_000_000, 1.0).unwrap();
        // 250 beds at 80% occupancy, 1.6x demand
        assert_eq!(estimate.projected_icu_beds, 320.0);
        assert_eq!(estimate.projected_testing_capacity, 5_700.0);
        assert_eq!(estimate.projected_ppe_units, 93_184.0);
        let expected = 320.0 * 15_000.0 + 93_184.0 * 0.85 + 5_700.0 * 25.0;
        assert!((estimate.cost_estimate - expected).abs() < 1e-6);
        assert_eq!(estimate.funding_tier, "Federal emergency funding request");
    }

    #[test]
    fn higher_probability_never_projects_less() {
        let planner = ResourcePlanner::new(UnitCosts::default(), 14);
        let low = planner.project(&snapshot(15, 0.0), 250_000, 1.0).unwrap();
        let high = planner.project(&snapshot(85, 0.0), 250_000, 1.0).unwrap();
        assert!(high.projected_icu_beds > low.projected_icu_beds);
        assert!(high.projected_testing_capacity > low.projected_testing_capacity);
        assert!(high.cost_estimate > low.cost_estimate);
    }

    #[test]
    fn rejects_non_positive_population() {
        let planner = ResourcePlanner::new(UnitCosts::default(), 14);
        assert!(matches!(
            planner.project(&snapshot(30, 0.0), 0, 1.0),
            Err(OutbreakError::Input(_))
        ));
    }

    #[test]
    fn funding_tiers() {
        assert_eq!(funding_tier(50_000.0), "Standard operational budget");
        assert_eq!(funding_tier(100_000.0), "Local emergency funds");
        assert_eq!(funding_tier(750_000.0), "State emergency allocation");
        assert_eq!(funding_tier(2_000_000.0), "Federal emergency funding request");
    }

    #[tokio::test]
    async fn geo_enrichment_is_optional() {
        let without = ResourcePlanner::new(UnitCosts::default(), 14).with_geo(Arc::new(Unavailable));
        let estimate = without.estimate(&snapshot(50, 0.1), 500_000, 1.2).await.unwrap();
        assert!(estimate.facilities.is_empty());
        assert!(estimate.projected_icu_beds > 0.0);

        let with = ResourcePlanner::new(UnitCosts::default(), 14).with_geo(Arc::new(FixedGeo));
        let enriched = with.estimate(&snapshot(50, 0.1), 500_000, 1.2).await.unwrap();
        assert_eq!(enriched.facilities.len(), 1);
        assert_eq!(enriched.projected_icu_beds, estimate.projected_icu_beds);
    }
}
