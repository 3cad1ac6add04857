use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub region_key: String,
    pub raw_count: i64,
    pub population: i64,
    #[serde(default)]
    pub hospitalized: Option<i64>,
    #[serde(default)]
    pub deaths: Option<i64>,
    /// Test positivity as a fraction in `[0, 1]`.
    #[serde(default)]
    pub positivity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    RapidAcceleration,
    ModerateGrowth,
    Stable,
    Declining,
    RapidDecline,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::RapidAcceleration,
        Classification::ModerateGrowth,
        Classification::Stable,
        Classification::Declining,
        Classification::RapidDecline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidAcceleration => "RAPID_ACCELERATION",
            Self::ModerateGrowth => "MODERATE_GROWTH",
            Self::Stable => "STABLE",
            Self::Declining => "DECLINING",
            Self::RapidDecline => "RAPID_DECLINE",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived trend signal for one region. Recomputed from a fresh series,
/// never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub region_key: String,
    pub as_of_date: NaiveDate,
    pub seven_day_avg: f64,
    pub prior_seven_day_avg: f64,
    pub growth_rate: f64,
    pub classification: Classification,
    pub outbreak_probability: u8,
    /// Built from fewer than two full windows.
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMetric {
    Fatality,
    Hospitalization,
    Positivity,
    CaseGrowth,
}

impl ClaimMetric {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fatality => "fatality rate",
            Self::Hospitalization => "hospitalization rate",
            Self::Positivity => "test positivity",
            Self::CaseGrowth => "weekly case growth",
        }
    }
}

/// Quantitative statement pulled out of a claim, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub metric: ClaimMetric,
    pub value_percent: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub raw_text: String,
    pub extracted_assertion: Option<Assertion>,
    pub region_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Supported,
    Contradicted,
    InsufficientData,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Supported => "SUPPORTED",
            Self::Contradicted => "CONTRADICTED",
            Self::InsufficientData => "INSUFFICIENT_DATA",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub claim: Claim,
    pub supporting_snapshot: Option<TrendSnapshot>,
    pub verdict: Verdict,
    pub confidence: f64,
    /// Observed range the assertion was checked against, in percent.
    pub observed_range: Option<(f64, f64)>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Audience {
    General,
    School,
    Travel,
    Workplace,
}

impl Audience {
    pub const ALL: [Audience; 4] = [
        Audience::General,
        Audience::School,
        Audience::Travel,
        Audience::Workplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::School => "SCHOOL",
            Self::Travel => "TRAVEL",
            Self::Workplace => "WORKPLACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceMessage {
    pub audience: Audience,
    pub risk_classification: Classification,
    pub advisory_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityLocation {
    pub name: String,
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub region_key: String,
    pub projected_icu_beds: f64,
    pub projected_ppe_units: f64,
    pub projected_testing_capacity: f64,
    pub cost_estimate: f64,
    pub funding_tier: String,
    #[serde(default)]
    pub facilities: Vec<FacilityLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    TrendStatus,
    ClaimCheck,
    Guidance,
    ResourcePlanning,
}

impl Intent {
    /// Summary order.
    pub const ALL: [Intent; 4] = [
        Intent::TrendStatus,
        Intent::ClaimCheck,
        Intent::Guidance,
        Intent::ResourcePlanning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrendStatus => "trend-status",
            Self::ClaimCheck => "claim-check",
            Self::Guidance => "guidance",
            Self::ResourcePlanning => "resource-planning",
        }
    }

    pub fn parse(label: &str) -> Option<Intent> {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "trend-status" | "trend" => Some(Self::TrendStatus),
            "claim-check" | "claim" => Some(Self::ClaimCheck),
            "guidance" => Some(Self::Guidance),
            "resource-planning" | "resources" => Some(Self::ResourcePlanning),
            _ => None,
        }
    }

    /// Claim checks read the raw series; resource planning reads population from it.
    pub fn needs_series(&self) -> bool {
        matches!(self, Self::ClaimCheck | Self::ResourcePlanning)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub query_text: String,
    pub region_hint: Option<String>,
    pub request_id: Uuid,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

impl OrchestrationRequest {
    pub fn new(query_text: impl Into<String>, region_hint: Option<String>) -> Self {
        Self {
            query_text: query_text.into(),
            region_hint,
            request_id: Uuid::new_v4(),
            as_of: None,
        }
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStatus {
    Ok,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Trend(TrendSnapshot),
    Claim(VerificationVerdict),
    Guidance(Vec<GuidanceMessage>),
    Resources(ResourceEstimate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub class: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResult {
    pub status: SubStatus,
    pub payload: Option<Payload>,
    pub error: Option<ErrorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationState {
    Received,
    Routing,
    Dispatching,
    Awaiting,
    Synthesizing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Classifier,
    Keywords,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    pub state: OrchestrationState,
    pub region_key: String,
    pub routed_by: Option<RoutingSource>,
    pub intents_matched: BTreeSet<Intent>,
    pub sub_results: BTreeMap<Intent, SubResult>,
    pub synthesized_summary: String,
}
