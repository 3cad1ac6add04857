use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::collaborators::{ContentFetcher, FetchedDocument};
use crate::config::ClaimSettings;
use crate::error::{OutbreakError, Result};
use crate::models::{
    Assertion, Claim, ClaimMetric, TimeSeriesPoint, TrendSnapshot, Verdict, VerificationVerdict,
};
use crate::trend;

const FATALITY_WORDS: &[&str] = &["fatality", "fatal", "mortality", "deadly", "death", "deaths", "die", "dies", "kills", "lethal"];
const HOSPITAL_WORDS: &[&str] = &["hospitalized", "hospitalised", "hospitalization", "hospitalisation", "hospital", "admitted"];
const POSITIVITY_WORDS: &[&str] = &["positivity", "positive", "positives"];
const GROWTH_WORDS: &[&str] = &["cases", "infections", "growth", "increase", "increased", "rise", "rising", "spike", "surge", "up"];
const DEBUNK_WORDS: &[&str] = &["false", "myth", "misinformation", "debunked", "misleading", "unfounded", "no evidence"];

/// Case, admission and death data the claim is checked against.
#[derive(Debug, Clone)]
pub struct RegionEvidence {
    pub region_key: String,
    pub series: Vec<TimeSeriesPoint>,
    pub snapshot: Option<TrendSnapshot>,
}

#[async_trait]
pub trait ClaimVerification: Send + Sync {
    fn extract(&self, text: &str, region_key: Option<String>) -> Claim;

    async fn verify(&self, claim: &Claim, evidence: &RegionEvidence) -> Result<VerificationVerdict>;
}

#[derive(Debug, Clone)]
enum Corroboration {
    Corroborated(Vec<String>),
    Refuted(Vec<String>),
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
struct ToleranceBand {
    lower: f64,
    upper: f64,
}

impl ToleranceBand {
    fn around(min: f64, max: f64, settings: &ClaimSettings) -> Self {
        Self {
            lower: min - min.abs() * settings.relative_tolerance - settings.absolute_tolerance,
            upper: max + max.abs() * settings.relative_tolerance + settings.absolute_tolerance,
        }
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

pub struct ClaimVerifier {
    fetcher: Arc<dyn ContentFetcher>,
    settings: ClaimSettings,
    percent: Regex,
}

impl ClaimVerifier {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, settings: ClaimSettings) -> Result<Self> {
        let percent = Regex::new(r"(?i)\b(\d+(?:[.,]\d+)*)\s*(?:%|percent\b|per cent\b)")
            .map_err(|e| OutbreakError::Internal(format!("percent pattern: {e}")))?;
        Ok(Self {
            fetcher,
            settings,
            percent,
        })
    }

    /// Pulls a metric and a percentage out of free text. A claim with no
    /// comparable figure keeps `extracted_assertion` empty.
    pub fn parse_claim(&self, text: &str, region_key: Option<String>) -> Claim {
        let lowered = text.to_lowercase();
        let words = words(&lowered);
        let metric = detect_metric(&words, &lowered);

        let figure = self
            .percent
            .captures(text)
            .and_then(|caps| {
                let whole = caps.get(0)?.as_str().to_string();
                let value = percent_value(caps.get(1)?.as_str())?;
                Some((value, whole))
            })
            .or_else(|| multiplier_figure(&words));

        let extracted_assertion = match (metric, figure) {
            (Some(metric), Some((value_percent, text))) => Some(Assertion {
                metric,
                value_percent,
                text,
            }),
            _ => None,
        };

        Claim {
            raw_text: text.to_string(),
            extracted_assertion,
            region_key,
        }
    }

    async fn corroborate(&self, assertion: &Assertion, region_key: &str) -> Corroboration {
        let query = format!("{} {} {}", assertion.metric.label(), assertion.text, region_key);
        match self.fetcher.fetch(&query).await {
            Ok(documents) => self.analyze_documents(assertion, &documents),
            Err(e) => {
                warn!(error = %e, "no external corroboration available");
                Corroboration::Unavailable
            }
        }
    }

    fn analyze_documents(&self, assertion: &Assertion, documents: &[FetchedDocument]) -> Corroboration {
        let mut supporting = Vec::new();
        let mut refuting = Vec::new();
        let slack = self.settings.absolute_tolerance
            + assertion.value_percent.abs() * self.settings.relative_tolerance;

        for doc in documents.iter().filter(|d| is_trusted_source(&d.url)) {
            let mut supports = false;
            let mut refutes = false;
            for sentence in doc.text.split(['!', '?', '\n']).flat_map(|s| s.split(". ")) {
                let lowered = sentence.to_lowercase();
                let sentence_words = words(&lowered);
                if detect_metric(&sentence_words, &lowered) != Some(assertion.metric) {
                    continue;
                }
                if DEBUNK_WORDS.iter().any(|w| contains_term(&sentence_words, &lowered, w)) {
                    refutes = true;
                    continue;
                }
                for caps in self.percent.captures_iter(sentence) {
                    let Some(value) = caps.get(1).and_then(|m| percent_value(m.as_str())) else {
                        continue;
                    };
                    if (value - assertion.value_percent).abs() <= slack {
                        supports = true;
                    } else {
                        refutes = true;
                    }
                }
            }
            match (supports, refutes) {
                (true, false) => supporting.push(doc.url.clone()),
                (false, true) => refuting.push(doc.url.clone()),
                _ => {}
            }
        }

        debug!(supporting = supporting.len(), refuting = refuting.len(), "external evidence weighed");
        if supporting.len() > refuting.len() {
            Corroboration::Corroborated(supporting)
        } else if refuting.len() > supporting.len() {
            Corroboration::Refuted(refuting)
        } else {
            Corroboration::Unavailable
        }
    }
}

#[async_trait]
impl ClaimVerification for ClaimVerifier {
    fn extract(&self, text: &str, region_key: Option<String>) -> Claim {
        self.parse_claim(text, region_key)
    }

    async fn verify(&self, claim: &Claim, evidence: &RegionEvidence) -> Result<VerificationVerdict> {
        let respond = |verdict, confidence: f64, observed_range, sources| VerificationVerdict {
            claim: claim.clone(),
            supporting_snapshot: evidence.snapshot.clone(),
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            observed_range,
            sources,
        };

        let Some(assertion) = claim.extracted_assertion.as_ref() else {
            return Ok(respond(Verdict::InsufficientData, 0.0, None, Vec::new()));
        };

        let region_key = claim.region_key.as_deref().unwrap_or(&evidence.region_key);
        let corroboration = self.corroborate(assertion, region_key).await;
        let observed = observed_values(assertion.metric, evidence);

        let (min, max) = match min_max(&observed) {
            Some(range) => range,
            None => {
                let (confidence, sources) = match corroboration {
                    Corroboration::Corroborated(s) | Corroboration::Refuted(s) => (0.25, s),
                    Corroboration::Unavailable => (0.0, Vec::new()),
                };
                return Ok(respond(Verdict::InsufficientData, confidence, None, sources));
            }
        };

        let band = ToleranceBand::around(min, max, &self.settings);
        let coverage = (observed.len() as f64 / trend::REQUIRED_POINTS as f64).min(1.0);
        let internal = 0.5 + 0.4 * coverage;
        let range = Some((min, max));

        let result = if band.contains(assertion.value_percent) {
            match corroboration {
                Corroboration::Corroborated(sources) => {
                    respond(Verdict::Supported, (internal + 0.15).min(0.95), range, sources)
                }
                Corroboration::Unavailable => {
                    respond(Verdict::InsufficientData, internal * 0.5, range, Vec::new())
                }
                Corroboration::Refuted(sources) => {
                    respond(Verdict::InsufficientData, internal * 0.3, range, sources)
                }
            }
        } else {
            match corroboration {
                Corroboration::Refuted(sources) => {
                    respond(Verdict::Contradicted, (internal + 0.15).min(0.95), range, sources)
                }
                Corroboration::Unavailable => {
                    respond(Verdict::Contradicted, internal * 0.8, range, Vec::new())
                }
                Corroboration::Corroborated(sources) => {
                    respond(Verdict::Contradicted, internal * 0.5, range, sources)
                }
            }
        };
        Ok(result)
    }
}

/// Historically observed values of `metric`, in percent.
fn observed_values(metric: ClaimMetric, evidence: &RegionEvidence) -> Vec<f64> {
    let ratio = |numerator: Option<i64>, point: &TimeSeriesPoint| {
        numerator
            .filter(|_| point.raw_count > 0)
            .map(|n| n as f64 / point.raw_count as f64 * 100.0)
    };

    match metric {
        ClaimMetric::Fatality => evidence
            .series
            .iter()
            .filter_map(|p| ratio(p.deaths, p))
            .collect(),
        ClaimMetric::Hospitalization => evidence
            .series
            .iter()
            .filter_map(|p| ratio(p.hospitalized, p))
            .collect(),
        ClaimMetric::Positivity => evidence
            .series
            .iter()
            .filter_map(|p| p.positivity.map(|v| v * 100.0))
            .collect(),
        ClaimMetric::CaseGrowth => {
            let growth: Vec<f64> = trend::weekly_growth_series(&evidence.series)
                .into_iter()
                .map(|(_, g)| g * 100.0)
                .collect();
            if growth.is_empty() {
                evidence
                    .snapshot
                    .iter()
                    .map(|s| s.growth_rate * 100.0)
                    .collect()
            } else {
                growth
            }
        }
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(values.iter().fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))))
}

fn detect_metric(words: &[&str], lowered: &str) -> Option<ClaimMetric> {
    let any = |list: &[&str]| list.iter().any(|term| contains_term(words, lowered, term));
    if any(FATALITY_WORDS) || lowered.contains("death rate") {
        Some(ClaimMetric::Fatality)
    } else if any(POSITIVITY_WORDS) {
        Some(ClaimMetric::Positivity)
    } else if any(HOSPITAL_WORDS) {
        Some(ClaimMetric::Hospitalization)
    } else if any(GROWTH_WORDS) {
        Some(ClaimMetric::CaseGrowth)
    } else {
        None
    }
}

/// "cases doubled" style growth claims.
fn multiplier_figure(words: &[&str]) -> Option<(f64, String)> {
    words.iter().find_map(|w| match *w {
        "doubled" => Some((100.0, "doubled".to_string())),
        "tripled" => Some((200.0, "tripled".to_string())),
        "quadrupled" => Some((300.0, "quadrupled".to_string())),
        _ => None,
    })
}

fn contains_term(words: &[&str], lowered: &str, term: &str) -> bool {
    if term.contains(' ') {
        lowered.contains(term)
    } else {
        words.contains(&term)
    }
}

fn words(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Public-health publishers whose content counts as corroboration.
pub fn is_trusted_source(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str().map(str::to_lowercase) else {
        return false;
    };
    let labels: Vec<&str> = host.split('.').collect();
    // gov.<country code>, e.g. health.gov.au
    let national_gov = labels.len() >= 3
        && labels[labels.len() - 2] == "gov"
        && labels[labels.len() - 1].len() == 2;
    host == "who.int"
        || host.ends_with(".who.int")
        || host.ends_with(".gov")
        || national_gov
        || host.starts_with("health.")
}

/// "1,200" and "12.5" as numbers; thousands separators are dropped.
fn percent_value(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}
