use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collaborators::LanguageClassifier;
use crate::error::{OutbreakError, Result};
use crate::models::{Intent, OrchestrationRequest, RoutingSource};

const CALENDAR_WORDS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "spring", "summer", "autumn", "fall", "winter",
];
const CLAIM_WORDS: &[&str] = &[
    "rumor", "rumors", "rumour", "true", "heard", "claim", "claims", "fake", "hoax",
    "misinformation", "verify", "debunk", "whatsapp", "facebook",
];
const GUIDANCE_WORDS: &[&str] = &[
    "mask", "masks", "school", "schools", "student", "students", "travel", "trip", "flight",
    "guidance", "advice", "recommend", "recommendation", "recommendations", "should",
    "precaution", "precautions", "workplace", "office", "safe",
];
const RESOURCE_WORDS: &[&str] = &[
    "hospital", "hospitals", "icu", "supplies", "supply", "bed", "beds", "ppe", "ventilator",
    "ventilators", "capacity", "resource", "resources", "equipment", "shortage",
];
const TREND_WORDS: &[&str] = &[
    "outbreak", "cases", "trend", "trends", "spread", "status", "risk", "increasing",
    "rising", "situation",
];
const BRIEFING_WORDS: &[&str] = &["briefing", "complete", "comprehensive", "everything"];
const CLAIM_PHRASES: &[&str] = &["is it true", "fact check"];
const BRIEFING_PHRASES: &[&str] = &["full report"];

/// (spelling, canonical key). Abbreviations only match in upper case.
const KNOWN_REGIONS: &[(&str, &str)] = &[
    ("california", "California"),
    ("texas", "Texas"),
    ("new york", "New York"),
    ("florida", "Florida"),
    ("illinois", "Illinois"),
    ("pennsylvania", "Pennsylvania"),
    ("ohio", "Ohio"),
    ("georgia", "Georgia"),
    ("north carolina", "North Carolina"),
    ("michigan", "Michigan"),
    ("washington", "Washington"),
    ("mumbai", "Mumbai"),
    ("delhi", "Delhi"),
    ("india", "India"),
];
const KNOWN_ABBREVIATIONS: &[(&str, &str)] = &[
    ("CA", "California"),
    ("TX", "Texas"),
    ("NY", "New York"),
    ("FL", "Florida"),
];

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub intents: BTreeSet<Intent>,
    pub source: RoutingSource,
}

pub struct IntentRouter {
    classifier: Arc<dyn LanguageClassifier>,
    min_confidence: f64,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn LanguageClassifier>, min_confidence: f64) -> Self {
        Self {
            classifier,
            min_confidence,
        }
    }

    /// Asks the language classifier first and falls back to keywords when it
    /// is unavailable or has nothing confident to say.
    pub async fn classify(&self, request: &OrchestrationRequest) -> Result<RouteDecision> {
        let decision = match self.classifier.classify(&request.query_text).await {
            Ok(scores) => {
                let intents: BTreeSet<Intent> = scores
                    .iter()
                    .filter(|score| score.confidence >= self.min_confidence)
                    .filter_map(|score| Intent::parse(&score.label))
                    .collect();
                if intents.is_empty() {
                    debug!(request_id = %request.request_id, "classifier returned no confident intents");
                    keyword_decision(&request.query_text)
                } else {
                    RouteDecision {
                        intents,
                        source: RoutingSource::Classifier,
                    }
                }
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "classifier unavailable, using keywords");
                keyword_decision(&request.query_text)
            }
        };

        if decision.intents.is_empty() {
            return Err(OutbreakError::FatalRouting(format!(
                "no intent resolved for request {}",
                request.request_id
            )));
        }
        Ok(decision)
    }
}

fn keyword_decision(text: &str) -> RouteDecision {
    RouteDecision {
        intents: keyword_intents(text),
        source: RoutingSource::Keywords,
    }
}

/// Deterministic keyword routing. Never empty: defaults to trend-status.
pub fn keyword_intents(text: &str) -> BTreeSet<Intent> {
    let lowered = text.to_lowercase();
    let words = tokenize(&lowered);
    let has_word = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
    let has_phrase = |list: &[&str]| list.iter().any(|p| contains_phrase(&words, p));

    let mut intents = BTreeSet::new();
    if has_word(BRIEFING_WORDS) || has_phrase(BRIEFING_PHRASES) {
        intents.extend(Intent::ALL);
        return intents;
    }
    if has_word(CLAIM_WORDS) || has_phrase(CLAIM_PHRASES) {
        intents.insert(Intent::ClaimCheck);
    }
    if has_word(GUIDANCE_WORDS) {
        intents.insert(Intent::Guidance);
    }
    if has_word(RESOURCE_WORDS) {
        intents.insert(Intent::ResourcePlanning);
    }
    if has_word(TREND_WORDS) || intents.is_empty() {
        intents.insert(Intent::TrendStatus);
    }
    intents
}

/// Region for a request: explicit hint, then a region named in the text,
/// then `national`.
pub fn resolve_region(request: &OrchestrationRequest, national: &str) -> Result<String> {
    if let Some(hint) = request.region_hint.as_deref() {
        let hint = hint.split_whitespace().collect::<Vec<_>>().join(" ");
        if !hint.is_empty() {
            let valid = hint
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '/' | '.' | '\''));
            if !valid {
                return Err(OutbreakError::input(format!("unresolvable region hint: {hint}")));
            }
            return Ok(canonical_region(&hint).unwrap_or(hint));
        }
    }
    Ok(extract_region(&request.query_text).unwrap_or_else(|| national.to_string()))
}

pub fn extract_region(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let words = tokenize(&lowered);
    for (spelling, canonical) in KNOWN_REGIONS {
        if contains_phrase(&words, spelling) {
            return Some(canonical.to_string());
        }
    }

    let original = tokenize(text);
    for (abbreviation, canonical) in KNOWN_ABBREVIATIONS {
        if original.iter().any(|w| w == abbreviation) {
            return Some(canonical.to_string());
        }
    }

    // "... in Some Place ...", skipping "in March" and the like
    original
        .iter()
        .enumerate()
        .filter(|(_, w)| w.eq_ignore_ascii_case("in"))
        .find_map(|(position, _)| {
            let place: Vec<&str> = original[position + 1..]
                .iter()
                .take_while(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
                .take_while(|w| !CALENDAR_WORDS.contains(&w.to_lowercase().trim_end_matches("'s")))
                .map(String::as_str)
                .collect();
            (!place.is_empty()).then(|| place.join(" "))
        })
}

fn canonical_region(name: &str) -> Option<String> {
    let lowered = name.to_lowercase();
    KNOWN_REGIONS
        .iter()
        .find(|(spelling, _)| *spelling == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .or_else(|| {
            KNOWN_ABBREVIATIONS
                .iter()
                .find(|(abbreviation, _)| *abbreviation == name)
                .map(|(_, canonical)| canonical.to_string())
        })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    if parts.is_empty() || parts.len() > words.len() {
        return false;
    }
    words
        .windows(parts.len())
        .any(|window| window.iter().zip(&parts).all(|(w, p)| w == p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{IntentScore, Unavailable};
    use async_trait::async_trait;

    struct FixedClassifier(Vec<IntentScore>);

    #[async_trait]
    impl LanguageClassifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> Result<Vec<IntentScore>> {
            Ok(self.0.clone())
        }
    }

    fn score(label: &str, confidence: f64) -> IntentScore {
        IntentScore {
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn keywords_cover_each_intent() {
        assert_eq!(
            keyword_intents("I heard a rumor about the virus"),
            BTreeSet::from([Intent::ClaimCheck])
        );
        assert_eq!(
            keyword_intents("Should kids wear a mask at school?"),
            BTreeSet::from([Intent::Guidance])
        );
        assert_eq!(
            keyword_intents("Are there enough ICU beds and supplies?"),
            BTreeSet::from([Intent::ResourcePlanning])
        );
        assert_eq!(
            keyword_intents("Is there an outbreak in X?"),
            BTreeSet::from([Intent::TrendStatus])
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "untrue" and "masked" are not keyword hits
        assert_eq!(
            keyword_intents("untrue masked"),
            BTreeSet::from([Intent::TrendStatus])
        );
    }

    #[test]
    fn briefing_requests_everything() {
        assert_eq!(
            keyword_intents("Give me a complete briefing for Texas"),
            BTreeSet::from(Intent::ALL)
        );
    }

    #[test]
    fn fallback_is_never_empty() {
        for text in ["", "   ", "?!", "hello there", "ventilator rumor travel", "ñandú"] {
            assert!(!keyword_intents(text).is_empty(), "{text:?}");
        }
    }

    #[tokio::test]
    async fn unavailable_classifier_falls_back_to_keywords() {
        let router = IntentRouter::new(Arc::new(Unavailable), 0.5);
        let request = OrchestrationRequest::new("Is there an outbreak in X?", None);
        let decision = router.classify(&request).await.unwrap();
        assert_eq!(decision.source, RoutingSource::Keywords);
        assert!(decision.intents.contains(&Intent::TrendStatus));
    }

    #[tokio::test]
    async fn confident_classifier_labels_win() {
        let router = IntentRouter::new(
            Arc::new(FixedClassifier(vec![
                score("claim-check", 0.9),
                score("guidance", 0.2),
                score("weather", 0.99),
            ])),
            0.5,
        );
        let request = OrchestrationRequest::new("anything at all", None);
        let decision = router.classify(&request).await.unwrap();
        assert_eq!(decision.source, RoutingSource::Classifier);
        assert_eq!(decision.intents, BTreeSet::from([Intent::ClaimCheck]));
    }

    #[tokio::test]
    async fn empty_classifier_answer_uses_keywords() {
        let router = IntentRouter::new(Arc::new(FixedClassifier(Vec::new())), 0.5);
        let request = OrchestrationRequest::new("hospital capacity please", None);
        let decision = router.classify(&request).await.unwrap();
        assert_eq!(decision.source, RoutingSource::Keywords);
        assert_eq!(decision.intents, BTreeSet::from([Intent::ResourcePlanning]));
    }

    #[test]
    fn region_resolution_order() {
        let hinted = OrchestrationRequest::new("cases in Texas", Some("  california ".into()));
        assert_eq!(resolve_region(&hinted, "US").unwrap(), "California");

        let named = OrchestrationRequest::new("What is the trend in new york?", None);
        assert_eq!(resolve_region(&named, "US").unwrap(), "New York");

        let generic = OrchestrationRequest::new("Is there an outbreak in X?", None);
        assert_eq!(resolve_region(&generic, "US").unwrap(), "X");

        let county = OrchestrationRequest::new("status in Los Angeles County today", None);
        assert_eq!(resolve_region(&county, "US").unwrap(), "Los Angeles County");

        let none = OrchestrationRequest::new("how are things?", None);
        assert_eq!(resolve_region(&none, "US").unwrap(), "US");

        let abbreviated = OrchestrationRequest::new("TX hospital beds", None);
        assert_eq!(resolve_region(&abbreviated, "US").unwrap(), "Texas");
    }

    #[test]
    fn calendar_words_are_not_regions() {
        assert_eq!(extract_region("Did cases spike in March?"), None);
        assert_eq!(extract_region("What happened in July in Cook County?"), Some("Cook County".to_string()));

        let dated = OrchestrationRequest::new("cases reported in Monday's update", None);
        assert_eq!(resolve_region(&dated, "US").unwrap(), "US");
    }

    #[test]
    fn malformed_hint_is_input_error() {
        let request = OrchestrationRequest::new("cases", Some("Texas; DROP TABLE".into()));
        assert!(matches!(
            resolve_region(&request, "US"),
            Err(OutbreakError::Input(_))
        ));
    }
}
