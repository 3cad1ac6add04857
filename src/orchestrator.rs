//! Request lifecycle: route, fan out to the specialists under a bounded
//! pool, wait for every task, then merge.
//!
//! States run RECEIVED, ROUTING, DISPATCHING, AWAITING, SYNTHESIZING,
//! COMPLETE. FAILED is only reachable from ROUTING. Once routing succeeds,
//! every downstream failure is recorded in the result instead of returned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::claims::{ClaimVerification, RegionEvidence};
use crate::collaborators::{HistoricalDataSource, LanguageClassifier, SeriesQuery};
use crate::config::Config;
use crate::error::{OutbreakError, Result};
use crate::guidance::{self, GuidanceTable};
use crate::models::{
    Audience, ErrorRecord, Intent, OrchestrationRequest, OrchestrationResult, OrchestrationState,
    Payload, SubResult, SubStatus, TimeSeriesPoint, TrendSnapshot,
};
use crate::planner::ResourceEstimation;
use crate::retry::{self, RetryPolicy};
use crate::router::{self, IntentRouter};
use crate::trend;

#[derive(Debug, Clone)]
struct TrendInputs {
    series: Arc<Vec<TimeSeriesPoint>>,
    snapshot: TrendSnapshot,
}

type TrendOutcome = std::result::Result<TrendInputs, Arc<OutbreakError>>;
type SharedTrend = Shared<BoxFuture<'static, TrendOutcome>>;

/// Collaborators and specialists wired into an orchestrator.
pub struct Specialists {
    pub data: Arc<dyn HistoricalDataSource>,
    pub classifier: Arc<dyn LanguageClassifier>,
    pub claims: Arc<dyn ClaimVerification>,
    pub planner: Arc<dyn ResourceEstimation>,
}

pub struct Orchestrator {
    config: Config,
    router: IntentRouter,
    data: Arc<dyn HistoricalDataSource>,
    claims: Arc<dyn ClaimVerification>,
    planner: Arc<dyn ResourceEstimation>,
    guidance: Arc<GuidanceTable>,
    cache: Arc<SnapshotCache>,
    retry: RetryPolicy,
}

#[derive(Clone)]
struct TaskContext {
    request_id: Uuid,
    region: String,
    query_text: String,
    audiences: BTreeSet<Audience>,
    facility_density: f64,
    task_timeout: Duration,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    claims: Arc<dyn ClaimVerification>,
    planner: Arc<dyn ResourceEstimation>,
    guidance: Arc<GuidanceTable>,
}

struct TrendJob {
    data: Arc<dyn HistoricalDataSource>,
    cache: Arc<SnapshotCache>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    task_timeout: Duration,
    region: String,
    as_of: NaiveDate,
    lookback_days: i64,
    needs_series: bool,
}

impl Orchestrator {
    pub fn new(config: Config, specialists: Specialists) -> Result<Self> {
        config.validate()?;
        let guidance = GuidanceTable::with_overrides(&config.guidance_overrides)?;
        let cache = SnapshotCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.capacity,
        );
        Ok(Self {
            router: IntentRouter::new(specialists.classifier, config.router.min_confidence),
            data: specialists.data,
            claims: specialists.claims,
            planner: specialists.planner,
            guidance: Arc::new(guidance),
            cache: Arc::new(cache),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Errors only for unusable requests. Everything after routing lands in
    /// the returned result.
    pub async fn handle(&self, request: OrchestrationRequest) -> Result<OrchestrationResult> {
        let started = Instant::now();
        let deadline = started + self.config.global_deadline();
        let request_id = request.request_id;
        debug!(%request_id, state = ?OrchestrationState::Received, "request received");

        if request.query_text.trim().is_empty() {
            return Err(OutbreakError::input("question must not be empty"));
        }
        let region = router::resolve_region(&request, &self.config.national_region)?;
        let as_of = request.as_of.unwrap_or_else(trend::today);

        debug!(%request_id, state = ?OrchestrationState::Routing, %region, "routing");
        let decision = match self.router.classify(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(%request_id, error = %e, "routing failed");
                return Ok(routing_failure(request_id, region, &e));
            }
        };
        let intents = decision.intents;

        debug!(%request_id, state = ?OrchestrationState::Dispatching, ?intents, "dispatching");
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let trend = self.trend_future(&region, as_of, &intents, semaphore.clone());
        let ctx = TaskContext {
            request_id,
            region: region.clone(),
            query_text: request.query_text.clone(),
            audiences: guidance::detect_audiences(&request.query_text),
            facility_density: self.config.facility_density_for(&region),
            task_timeout: self.config.task_timeout(),
            semaphore,
            retry: self.retry.clone(),
            claims: self.claims.clone(),
            planner: self.planner.clone(),
            guidance: self.guidance.clone(),
        };

        let mut tasks = JoinSet::new();
        for intent in intents.iter().copied() {
            let ctx = ctx.clone();
            let trend = trend.clone();
            tasks.spawn(async move { (intent, run_intent(intent, ctx, trend).await) });
        }

        debug!(%request_id, state = ?OrchestrationState::Awaiting, tasks = tasks.len(), "awaiting specialists");
        let mut sub_results = BTreeMap::new();
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((intent, result)))) => {
                    sub_results.insert(intent, result);
                }
                Ok(Some(Err(e))) => warn!(%request_id, error = %e, "specialist task ended abnormally"),
                Ok(None) => break,
                Err(_) => {
                    warn!(%request_id, pending = tasks.len(), "global deadline reached, cancelling");
                    deadline_hit = true;
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        for intent in intents.iter().copied() {
            sub_results.entry(intent).or_insert_with(|| {
                let error = if deadline_hit {
                    retry::timeout_error("global deadline", self.config.global_deadline())
                } else {
                    OutbreakError::Internal(format!("{intent} task ended without a result"))
                };
                failed(&error)
            });
        }

        debug!(%request_id, state = ?OrchestrationState::Synthesizing, "synthesizing");
        let synthesized_summary = synthesize_summary(&region, &sub_results);

        info!(
            %request_id,
            %region,
            intents = intents.len(),
            failed = sub_results.values().filter(|r| r.status == SubStatus::Failed).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request complete"
        );
        Ok(OrchestrationResult {
            request_id,
            state: OrchestrationState::Complete,
            region_key: region,
            routed_by: Some(decision.source),
            intents_matched: intents,
            sub_results,
            synthesized_summary,
        })
    }

    /// Trend snapshot for one region and date, without the routing step.
    pub async fn snapshot(&self, region: &str, as_of: NaiveDate) -> Result<TrendSnapshot> {
        let job = TrendJob {
            data: self.data.clone(),
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            semaphore: Arc::new(Semaphore::new(1)),
            task_timeout: self.config.task_timeout(),
            region: region.to_string(),
            as_of,
            lookback_days: self.config.lookback_days,
            needs_series: false,
        };
        Ok(load_trend(job).await?.snapshot)
    }

    /// The one trend computation per request. Every specialist that needs a
    /// snapshot awaits this same future.
    fn trend_future(
        &self,
        region: &str,
        as_of: NaiveDate,
        intents: &BTreeSet<Intent>,
        semaphore: Arc<Semaphore>,
    ) -> SharedTrend {
        let job = TrendJob {
            data: self.data.clone(),
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            semaphore,
            task_timeout: self.config.task_timeout(),
            region: region.to_string(),
            as_of,
            lookback_days: self.config.lookback_days,
            needs_series: intents.iter().any(Intent::needs_series),
        };
        async move { load_trend(job).await.map_err(Arc::new) }
            .boxed()
            .shared()
    }
}

async fn load_trend(job: TrendJob) -> Result<TrendInputs> {
    let cached = job.cache.get(&job.region, job.as_of);
    if let Some(snapshot) = cached.as_ref().filter(|_| !job.needs_series) {
        debug!(region = %job.region, as_of = %job.as_of, "snapshot cache hit");
        return Ok(TrendInputs {
            series: Arc::new(Vec::new()),
            snapshot: snapshot.clone(),
        });
    }

    let _permit = job
        .semaphore
        .acquire()
        .await
        .map_err(|_| OutbreakError::Internal("dispatch pool closed".into()))?;

    let query = SeriesQuery {
        region_key: job.region.clone(),
        sub_region: None,
        since: trend::cutoff_date(job.as_of, job.lookback_days),
        until: job.as_of,
    };
    let data = &job.data;
    let mut series = tokio::time::timeout(job.task_timeout, job.retry.run(|| data.fetch_series(&query)))
        .await
        .map_err(|_| retry::timeout_error("historical data query", job.task_timeout))??;

    // snapshots and cache entries are keyed by the resolved region
    for point in &mut series {
        point.region_key.clone_from(&job.region);
    }

    let snapshot = match cached {
        Some(snapshot) => snapshot,
        None => match trend::compute_snapshot(&series, job.as_of) {
            Ok(snapshot) => {
                job.cache.insert(snapshot.clone());
                debug!(region = %job.region, entries = job.cache.len(), "snapshot cached");
                snapshot
            }
            Err(OutbreakError::InsufficientData { available, .. }) => {
                debug!(region = %job.region, available, "short series, estimating snapshot");
                trend::estimate_snapshot(&series, job.as_of)?
            }
            Err(e) => return Err(e),
        },
    };

    Ok(TrendInputs {
        series: Arc::new(series),
        snapshot,
    })
}

/// Acquires a pool slot, then runs `operation` under the per-task timeout
/// with one retry for transient failures.
async fn bounded<T, F, Fut>(ctx: &TaskContext, what: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let _permit = ctx
        .semaphore
        .acquire()
        .await
        .map_err(|_| OutbreakError::Internal("dispatch pool closed".into()))?;
    match tokio::time::timeout(ctx.task_timeout, ctx.retry.run(operation)).await {
        Ok(result) => result,
        Err(_) => Err(retry::timeout_error(what, ctx.task_timeout)),
    }
}

async fn run_intent(intent: Intent, ctx: TaskContext, trend: SharedTrend) -> SubResult {
    match dispatch(intent, &ctx, trend).await {
        Ok((payload, degraded)) => SubResult {
            status: if degraded { SubStatus::Degraded } else { SubStatus::Ok },
            payload: Some(payload),
            error: None,
        },
        Err(record) => {
            warn!(
                request_id = %ctx.request_id,
                %intent,
                class = %record.class,
                error = %record.message,
                "sub-analysis failed"
            );
            SubResult {
                status: SubStatus::Failed,
                payload: None,
                error: Some(record),
            }
        }
    }
}

/// Payload plus whether it rests on an estimated dependency.
async fn dispatch(
    intent: Intent,
    ctx: &TaskContext,
    trend: SharedTrend,
) -> std::result::Result<(Payload, bool), ErrorRecord> {
    match intent {
        Intent::TrendStatus => {
            let inputs = trend.await.map_err(|e| record(&e))?;
            let estimated = inputs.snapshot.estimated;
            Ok((Payload::Trend(inputs.snapshot), estimated))
        }
        Intent::Guidance => {
            let inputs = trend.await.map_err(|e| record(&e))?;
            let messages = ctx
                .guidance
                .synthesize(&inputs.snapshot, &ctx.audiences)
                .map_err(|e| record(&e))?;
            Ok((Payload::Guidance(messages), inputs.snapshot.estimated))
        }
        Intent::ResourcePlanning => {
            let inputs = trend.await.map_err(|e| record(&e))?;
            let population = inputs.series.last().map(|p| p.population).unwrap_or(0);
            let snapshot = &inputs.snapshot;
            let planner = &ctx.planner;
            let density = ctx.facility_density;
            let estimate = bounded(ctx, "resource planning", || {
                planner.estimate(snapshot, population, density)
            })
            .await
            .map_err(|e| record(&e))?;
            Ok((Payload::Resources(estimate), snapshot.estimated))
        }
        Intent::ClaimCheck => {
            let (evidence, degraded) = match trend.await {
                Ok(inputs) => {
                    let estimated = inputs.snapshot.estimated;
                    let evidence = RegionEvidence {
                        region_key: ctx.region.clone(),
                        series: inputs.series.to_vec(),
                        snapshot: Some(inputs.snapshot),
                    };
                    (evidence, estimated)
                }
                Err(e) => {
                    debug!(request_id = %ctx.request_id, error = %e, "claim check without trend data");
                    let evidence = RegionEvidence {
                        region_key: ctx.region.clone(),
                        series: Vec::new(),
                        snapshot: None,
                    };
                    (evidence, true)
                }
            };
            let claims = &ctx.claims;
            let claim = claims.extract(&ctx.query_text, Some(ctx.region.clone()));
            let evidence = &evidence;
            let claim = &claim;
            let verdict = bounded(ctx, "claim verification", || claims.verify(claim, evidence))
                .await
                .map_err(|e| record(&e))?;
            Ok((Payload::Claim(verdict), degraded))
        }
    }
}

fn record(error: &OutbreakError) -> ErrorRecord {
    ErrorRecord {
        class: error.class().to_string(),
        message: error.to_string(),
    }
}

fn failed(error: &OutbreakError) -> SubResult {
    SubResult {
        status: SubStatus::Failed,
        payload: None,
        error: Some(record(error)),
    }
}

fn routing_failure(request_id: Uuid, region: String, error: &OutbreakError) -> OrchestrationResult {
    OrchestrationResult {
        request_id,
        state: OrchestrationState::Failed,
        region_key: region,
        routed_by: None,
        intents_matched: BTreeSet::new(),
        sub_results: BTreeMap::new(),
        synthesized_summary: format!(
            "The question could not be routed to any analysis ({}). Please rephrase it.",
            error.class()
        ),
    }
}

/// Payload text in intent order, FAILED entries skipped, then disclosures.
pub fn synthesize_summary(region: &str, sub_results: &BTreeMap<Intent, SubResult>) -> String {
    let mut out = String::new();

    for result in sub_results.values() {
        let Some(payload) = result.payload.as_ref().filter(|_| result.status != SubStatus::Failed) else {
            continue;
        };
        match payload {
            Payload::Trend(s) => {
                let _ = write!(
                    out,
                    "Trend for {} as of {}: {} ({:+.1}% week over week, 7-day average {:.1} cases/day); outbreak probability {}%.",
                    region,
                    s.as_of_date,
                    s.classification,
                    s.growth_rate * 100.0,
                    s.seven_day_avg,
                    s.outbreak_probability
                );
                if s.estimated {
                    let _ = write!(out, " Estimated from fewer than 14 days of data.");
                }
                let _ = writeln!(out);
            }
            Payload::Claim(v) => {
                let _ = write!(
                    out,
                    "Claim check: {} (confidence {:.0}%) for \"{}\".",
                    v.verdict,
                    v.confidence * 100.0,
                    v.claim.raw_text.trim()
                );
                if let (Some(assertion), Some((low, high))) =
                    (v.claim.extracted_assertion.as_ref(), v.observed_range)
                {
                    let _ = write!(
                        out,
                        " Recorded {} ranged from {:.1}% to {:.1}%; the claim states {:.1}%.",
                        assertion.metric.label(),
                        low,
                        high,
                        assertion.value_percent
                    );
                }
                let _ = writeln!(out);
            }
            Payload::Guidance(messages) => {
                for message in messages {
                    let _ = writeln!(
                        out,
                        "Guidance ({}): {}",
                        message.audience.as_str().to_lowercase(),
                        message.advisory_text
                    );
                }
            }
            Payload::Resources(e) => {
                let _ = writeln!(
                    out,
                    "Resource outlook for {}: {:.0} ICU beds, {:.0} daily tests, {:.0} PPE units per week; estimated cost ${:.0} ({}).",
                    e.region_key,
                    e.projected_icu_beds,
                    e.projected_testing_capacity,
                    e.projected_ppe_units,
                    e.cost_estimate,
                    e.funding_tier
                );
            }
        }
    }

    let labels = |status: SubStatus| -> Vec<String> {
        sub_results
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(intent, r)| match (&r.error, status) {
                (Some(error), SubStatus::Failed) => format!("{intent} ({})", error.class),
                _ => intent.to_string(),
            })
            .collect()
    };

    let failed = labels(SubStatus::Failed);
    if !failed.is_empty() {
        let _ = writeln!(out, "Some analyses could not be completed: {}.", failed.join(", "));
    }
    let degraded = labels(SubStatus::Degraded);
    if !degraded.is_empty() {
        let _ = writeln!(
            out,
            "Some results rely on estimated or incomplete data and carry reduced confidence: {}.",
            degraded.join(", ")
        );
    }

    out.trim_end().to_string()
}
