//! reqwest-backed collaborators. Each talks JSON to a configured endpoint;
//! transport failures surface as transient errors so the orchestrator can
//! retry them.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{ContentFetcher, FetchedDocument, GeoService, IntentScore, LanguageClassifier};
use crate::error::{OutbreakError, Result};
use crate::models::FacilityLocation;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_DOCUMENT_CHARS: usize = 20_000;

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("outbreak-risk/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

fn parse_endpoint(endpoint: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse(endpoint)
        .map_err(|e| OutbreakError::config(format!("invalid endpoint {endpoint}: {e}")))
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    labels: [&'static str; 4],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    intents: Vec<IntentScore>,
}

pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpClassifier {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(),
            endpoint: parse_endpoint(endpoint)?,
        })
    }
}

#[async_trait]
impl LanguageClassifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<IntentScore>> {
        let body = ClassifyRequest {
            text,
            labels: ["trend-status", "claim-check", "guidance", "resource-planning"],
        };
        let response: ClassifyResponse = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(intents = response.intents.len(), "classifier responded");
        if let Some(bad) = response
            .intents
            .iter()
            .find(|score| !(0.0..=1.0).contains(&score.confidence))
        {
            return Err(OutbreakError::collaborator(format!(
                "classifier returned confidence {} for {}",
                bad.confidence, bad.label
            )));
        }
        Ok(response.intents)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    content: String,
}

/// Runs a search query against the content-search endpoint, or reads a
/// page directly when handed a URL.
pub struct HttpContentFetcher {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    scripts: Regex,
    tags: Regex,
    whitespace: Regex,
}

impl HttpContentFetcher {
    pub fn new(endpoint: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| OutbreakError::Internal(format!("html pattern: {e}")))
        };
        Ok(Self {
            client: build_client(),
            endpoint: parse_endpoint(endpoint)?,
            scripts: compile(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")?,
            tags: compile(r"(?s)<[^>]+>")?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Visible text of an HTML page, truncated.
    pub fn strip_html(&self, html: &str) -> String {
        let without_scripts = self.scripts.replace_all(html, " ");
        let without_tags = self.tags.replace_all(&without_scripts, " ");
        let text = self.whitespace.replace_all(&without_tags, " ");
        text.trim().chars().take(MAX_DOCUMENT_CHARS).collect()
    }

    async fn read_page(&self, url: reqwest::Url) -> Result<Vec<FetchedDocument>> {
        let body = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let text = self.strip_html(&body);
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![FetchedDocument {
            url: url.to_string(),
            text,
        }])
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, query: &str) -> Result<Vec<FetchedDocument>> {
        if let Ok(url) = reqwest::Url::parse(query.trim()) {
            if matches!(url.scheme(), "http" | "https") {
                return self.read_page(url).await;
            }
        }

        let response: SearchResponse = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .results
            .into_iter()
            .filter(|hit| !hit.content.trim().is_empty())
            .map(|hit| FetchedDocument {
                text: self.strip_html(&hit.content),
                url: hit.url,
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct FacilityResponse {
    #[serde(default)]
    facilities: Vec<FacilityLocation>,
}

pub struct HttpGeoService {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpGeoService {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(),
            endpoint: parse_endpoint(endpoint)?,
        })
    }
}

#[async_trait]
impl GeoService for HttpGeoService {
    async fn facilities(&self, region_key: &str) -> Result<Vec<FacilityLocation>> {
        let response: FacilityResponse = self
            .client
            .get(self.endpoint.clone())
            .query(&[("region", region_key), ("kind", "hospital")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.facilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_scripts_and_whitespace() {
        let fetcher = HttpContentFetcher::new("http://localhost:9000/search").unwrap();
        let html = r#"<html><head><style>p { color: red; }</style>
            <script>var x = "<b>nope</b>";</script></head>
            <body><h1>Weekly update</h1>
            <p>Test   positivity was <b>8%</b>.</p></body></html>"#;
        assert_eq!(fetcher.strip_html(html), "Weekly update Test positivity was 8% .");
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!(matches!(
            HttpClassifier::new("not a url"),
            Err(OutbreakError::Config(_))
        ));
        assert!(HttpGeoService::new("https://geo.example.org/facilities").is_ok());
    }

    #[test]
    fn search_hits_tolerate_missing_content() {
        let raw = r#"{"results":[{"url":"https://www.cdc.gov/a"},{"url":"https://who.int/b","content":"x"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert!(parsed.results[0].content.is_empty());
    }
}
