//! Discovery pipeline: aggregation, refinement, validation, ingestion and
//! run reporting.

pub mod aggregate;
pub mod ingest;
pub mod refine;
pub mod reports;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use linkscout_adapters::{
    builtin_networks, load_networks_yaml, AdapterContext, CompetitorAdapter, HttpSitemapFetcher,
    KnownNetworkAdapter, SearchQueryAdapter, SimulatedSearchProvider, SitemapAdapter,
    SocialSignalAdapter, SourceAdapter,
};
use linkscout_core::{
    DiscoveryQuery, DiscoveryResult, DiscoveryStats, IngestionReport, PlatformTarget, QueryError,
    ValidationReport,
};
use linkscout_storage::{
    HttpClientConfig, HttpFetcher, JsonFileSink, PgPlatformSink, PlatformSink, TokenBucketConfig,
};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub use aggregate::{Aggregation, Aggregator};
pub use ingest::{ingest, DEFAULT_INGEST_CONCURRENCY};
pub use refine::{dedup, matches_query, refine, DedupPolicy};
pub use reports::{write_run_reports, RunRecord, RunReportPaths};
pub use validate::{HttpProber, LivenessProber, ProbeVerdict, Validator};

pub const CRATE_NAME: &str = "linkscout-sync";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid discovery query: {0}")]
    InvalidQuery(#[from] QueryError),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_rate_per_sec: Option<u32>,
    pub request_delay_ms: u64,
    pub probe_timeout_secs: u64,
    pub probe_concurrency: usize,
    pub deadline_secs: Option<u64>,
    pub detect_forms: bool,
    pub crawl_sitemaps: bool,
    pub networks_file: Option<PathBuf>,
    pub dedup_policy: DedupPolicy,
    pub scheduler_enabled: bool,
    pub revalidate_cron: String,
    pub scheduled_keywords: Vec<String>,
    pub web_port: u16,
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            data_dir: lookup("LINKSCOUT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/platforms")),
            reports_dir: lookup("LINKSCOUT_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            user_agent: lookup("LINKSCOUT_USER_AGENT")
                .unwrap_or_else(|| "linkscout-bot/0.1".to_string()),
            http_timeout_secs: number("LINKSCOUT_HTTP_TIMEOUT_SECS").unwrap_or(20),
            http_rate_per_sec: number("LINKSCOUT_HTTP_RATE_PER_SEC")
                .filter(|n| *n > 0)
                .map(|n| n.min(1000) as u32),
            request_delay_ms: number("LINKSCOUT_REQUEST_DELAY_MS").unwrap_or(1000),
            probe_timeout_secs: number("LINKSCOUT_PROBE_TIMEOUT_SECS").unwrap_or(10),
            probe_concurrency: number("LINKSCOUT_PROBE_CONCURRENCY")
                .map(|n| n.max(1) as usize)
                .unwrap_or(validate::DEFAULT_PROBE_CONCURRENCY),
            deadline_secs: number("LINKSCOUT_DEADLINE_SECS").filter(|n| *n > 0),
            detect_forms: flag(lookup("LINKSCOUT_DETECT_FORMS")),
            crawl_sitemaps: flag(lookup("LINKSCOUT_CRAWL_SITEMAPS")),
            networks_file: lookup("LINKSCOUT_NETWORKS_FILE").map(PathBuf::from),
            dedup_policy: match lookup("LINKSCOUT_DEDUP_POLICY").as_deref() {
                Some("highest_authority") => DedupPolicy::HighestAuthority,
                _ => DedupPolicy::FirstSeen,
            },
            scheduler_enabled: flag(lookup("LINKSCOUT_SCHEDULER_ENABLED")),
            revalidate_cron: lookup("LINKSCOUT_REVALIDATE_CRON")
                .unwrap_or_else(|| "0 0 3 * * *".to_string()),
            scheduled_keywords: lookup("LINKSCOUT_SCHEDULED_KEYWORDS")
                .map(|v| {
                    v.split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            web_port: lookup("LINKSCOUT_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            token_bucket: self.http_rate_per_sec.map(|per_sec| TokenBucketConfig {
                capacity: per_sec,
                refill_every: Duration::from_millis(1000 / u64::from(per_sec)),
            }),
            ..Default::default()
        }
    }
}

/// Facade over the whole pipeline. Cheap to share behind an `Arc`; every
/// call builds its own adapter context, so concurrent calls never share
/// pacing state.
pub struct DiscoveryEngine {
    aggregator: Aggregator,
    validator: Validator,
    dedup_policy: DedupPolicy,
    ingest_concurrency: usize,
}

pub struct DiscoveryEngineBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    prober: Option<Arc<dyn LivenessProber>>,
    deadline: Option<Duration>,
    dedup_policy: DedupPolicy,
    probe_timeout: Duration,
    probe_concurrency: usize,
    ingest_concurrency: usize,
}

impl Default for DiscoveryEngineBuilder {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            prober: None,
            deadline: None,
            dedup_policy: DedupPolicy::default(),
            probe_timeout: validate::DEFAULT_PROBE_TIMEOUT,
            probe_concurrency: validate::DEFAULT_PROBE_CONCURRENCY,
            ingest_concurrency: DEFAULT_INGEST_CONCURRENCY,
        }
    }
}

impl DiscoveryEngineBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn SourceAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn LivenessProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency;
        self
    }

    pub fn ingest_concurrency(mut self, concurrency: usize) -> Self {
        self.ingest_concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> Result<DiscoveryEngine, DiscoveryError> {
        let prober = self
            .prober
            .ok_or_else(|| DiscoveryError::Config("no liveness prober configured".to_string()))?;
        Ok(DiscoveryEngine {
            aggregator: Aggregator::new(self.adapters).with_deadline(self.deadline),
            validator: Validator::new(prober)
                .with_probe_timeout(self.probe_timeout)
                .with_concurrency(self.probe_concurrency),
            dedup_policy: self.dedup_policy,
            ingest_concurrency: self.ingest_concurrency,
        })
    }
}

/// The five standard adapters in registration order. Competitor and social
/// sources stay unwired; sitemap crawling is wired only when enabled.
pub fn default_adapters(
    config: &DiscoveryConfig,
    http: Arc<HttpFetcher>,
) -> Result<Vec<Arc<dyn SourceAdapter>>, DiscoveryError> {
    let networks = match &config.networks_file {
        Some(path) => load_networks_yaml(path).map_err(|e| DiscoveryError::Config(format!("{e:#}")))?,
        None => builtin_networks(),
    };
    let delay = config.request_delay();

    let sitemap = if config.crawl_sitemaps {
        SitemapAdapter::new(Arc::new(HttpSitemapFetcher::new(http)), networks.clone())
    } else {
        SitemapAdapter::unwired()
    };

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(
            SearchQueryAdapter::new(Arc::new(SimulatedSearchProvider::default()))
                .with_request_delay(delay),
        ),
        Arc::new(KnownNetworkAdapter::new(networks).with_request_delay(delay)),
        Arc::new(CompetitorAdapter::unwired()),
        Arc::new(sitemap.with_request_delay(delay)),
        Arc::new(SocialSignalAdapter::unwired()),
    ];
    Ok(adapters)
}

impl DiscoveryEngine {
    pub fn builder() -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder::default()
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let http = Arc::new(
            HttpFetcher::new(config.http_client_config())
            .map_err(|e| DiscoveryError::Config(format!("{e:#}")))?,
        );
        let prober = HttpProber::new(Arc::clone(&http), config.probe_timeout())
            .with_form_detection(config.detect_forms);

        Self::builder()
            .adapters(default_adapters(config, http)?)
            .prober(Arc::new(prober))
            .deadline(config.deadline())
            .dedup_policy(config.dedup_policy)
            .probe_timeout(config.probe_timeout())
            .probe_concurrency(config.probe_concurrency)
            .build()
    }

    pub fn source_ids(&self) -> Vec<&'static str> {
        self.aggregator.source_ids()
    }

    /// Runs every adapter, then dedups, filters and bounds the merged
    /// candidates. Only a malformed query fails the call.
    pub async fn discover(&self, query: &DiscoveryQuery) -> Result<DiscoveryResult, DiscoveryError> {
        self.discover_in_run(query, Uuid::new_v4()).await
    }

    /// Same as [`DiscoveryEngine::discover`], logged and handed to the
    /// adapters under `run_id`.
    pub async fn discover_in_run(
        &self,
        query: &DiscoveryQuery,
        run_id: Uuid,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        query.validate()?;
        let started = Instant::now();
        let ctx = Arc::new(AdapterContext::new(query.clone()).with_run_id(run_id));
        info!(
            run_id = %ctx.run_id,
            keywords = ?query.keywords,
            generated_queries = ctx.search_queries.len(),
            "discovery started"
        );

        let aggregation = self.aggregator.run(Arc::clone(&ctx)).await;
        let raw = aggregation.candidates.len();
        let platforms = refine(aggregation.candidates, query, self.dedup_policy);
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            run_id = %ctx.run_id,
            raw,
            kept = platforms.len(),
            failed_sources = aggregation.failures.len(),
            processing_time_ms,
            "discovery finished"
        );
        Ok(DiscoveryResult {
            total_found: platforms.len(),
            platforms,
            search_queries: aggregation.search_queries,
            processing_time_ms,
            sources: aggregation.sources,
            failures: aggregation.failures,
        })
    }

    pub async fn validate(&self, platforms: Vec<PlatformTarget>) -> ValidationReport {
        self.validator.validate(platforms).await
    }

    pub async fn ingest(&self, sink: &dyn PlatformSink, platforms: &[PlatformTarget]) -> IngestionReport {
        ingest(sink, platforms, self.ingest_concurrency).await
    }

    pub fn stats(platforms: &[PlatformTarget]) -> DiscoveryStats {
        DiscoveryStats::from_platforms(platforms)
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise the JSON file store.
pub async fn build_sink(config: &DiscoveryConfig) -> Result<Arc<dyn PlatformSink>> {
    match &config.database_url {
        Some(url) => {
            let sink = PgPlatformSink::connect(url).await?;
            sink.migrate().await?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(JsonFileSink::new(config.data_dir.clone()))),
    }
}

#[derive(Clone, Default)]
pub struct RunOptions {
    pub validate: bool,
    pub sink: Option<Arc<dyn PlatformSink>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub result: DiscoveryResult,
    pub validation: Option<ValidationReport>,
    pub ingestion: Option<IngestionReport>,
    pub reports: RunReportPaths,
}

/// One full run: discover, optionally validate, optionally ingest (the
/// validated set when validation ran), then write reports.
pub async fn run_discovery_once(
    engine: &DiscoveryEngine,
    config: &DiscoveryConfig,
    query: &DiscoveryQuery,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let result = engine.discover_in_run(query, run_id).await?;

    let validation = if options.validate {
        Some(engine.validate(result.platforms.clone()).await)
    } else {
        None
    };

    let ingestion = match &options.sink {
        Some(sink) => {
            let platforms = validation
                .as_ref()
                .map(|v| v.validated.as_slice())
                .unwrap_or(&result.platforms);
            Some(engine.ingest(sink.as_ref(), platforms).await)
        }
        None => None,
    };

    let stats = DiscoveryEngine::stats(
        validation
            .as_ref()
            .map(|v| v.validated.as_slice())
            .unwrap_or(&result.platforms),
    );
    let record = RunRecord {
        run_id,
        started_at,
        finished_at: Utc::now(),
        query,
        result: &result,
        validation: validation.as_ref(),
        ingestion: ingestion.as_ref(),
        stats,
    };
    let reports = write_run_reports(&config.reports_dir, &record)
        .await
        .context("writing run reports")?;

    info!(%run_id, reports_dir = %reports.reports_dir.display(), "run complete");
    Ok(RunOutcome {
        run_id,
        result,
        validation,
        ingestion,
        reports,
    })
}

pub async fn run_discovery_once_from_env(query: &DiscoveryQuery, validate: bool, ingest: bool) -> Result<RunOutcome> {
    let config = DiscoveryConfig::from_env();
    let engine = DiscoveryEngine::from_config(&config)?;
    let sink = if ingest {
        Some(build_sink(&config).await?)
    } else {
        None
    };
    run_discovery_once(&engine, &config, query, &RunOptions { validate, sink }).await
}

/// Periodic discover + validate + ingest over the configured keywords, so
/// advisory scores get refreshed. `None` unless the scheduler is enabled.
pub async fn maybe_build_scheduler(
    engine: Arc<DiscoveryEngine>,
    config: &DiscoveryConfig,
    sink: Arc<dyn PlatformSink>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    if config.scheduled_keywords.is_empty() {
        anyhow::bail!("LINKSCOUT_SCHEDULED_KEYWORDS must name at least one keyword when the scheduler is enabled");
    }

    let query = DiscoveryQuery::new(config.scheduled_keywords.clone());
    query.validate().context("validating scheduled query")?;

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job = Job::new_async(config.revalidate_cron.as_str(), move |_uuid, _l| {
        let engine = Arc::clone(&engine);
        let config = job_config.clone();
        let query = query.clone();
        let options = RunOptions {
            validate: true,
            sink: Some(Arc::clone(&sink)),
        };
        Box::pin(async move {
            match run_discovery_once(&engine, &config, &query, &options).await {
                Ok(outcome) => info!(
                    run_id = %outcome.run_id,
                    found = outcome.result.total_found,
                    "scheduled revalidation finished"
                ),
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled revalidation failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.revalidate_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
