//! HTTP fetch/probe utilities and persistence sinks for discovered venues.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use linkscout_core::{canonical_domain, PlatformTarget};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "linkscout-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

/// Outcome of a liveness probe that reached the server.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("timed out after {timeout_ms} ms: {url}")]
    Timeout { url: String, timeout_ms: u128 },
    #[error("request limiter closed")]
    LimiterClosed,
}

/// Shared HTTP client with global/per-source concurrency caps, optional token
/// bucket and retry with capped exponential backoff.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(FetchError::Request(err)),
            None => Err(FetchError::HttpStatus {
                status: 0,
                url: url.to_string(),
            }),
        }
    }

    /// Single HEAD request bounded by `timeout`, no retries. Servers that
    /// refuse HEAD get one GET instead. Any status is returned to the caller.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("probe", url);
        async {
            let started = Instant::now();
            let mut resp = self.send_probe(self.client.head(url), url, timeout).await?;
            if matches!(
                resp.status(),
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
            ) {
                resp = self.send_probe(self.client.get(url), url, timeout).await?;
            }
            Ok(ProbeResponse {
                status: resp.status(),
                final_url: resp.url().to_string(),
                elapsed: started.elapsed(),
            })
        }
        .instrument(span)
        .await
    }

    async fn send_probe(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response, FetchError> {
        request.timeout(timeout).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis(),
                }
            } else {
                FetchError::Request(err)
            }
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("already exists in sink")]
    Duplicate,
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Destination for validated venues. Implementations must accept concurrent
/// independent calls; there is no batch-level transaction.
#[async_trait]
pub trait PlatformSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upsert(&self, platform: &PlatformTarget) -> Result<(), SinkError>;
}

/// In-process sink keyed by dedup key. Rejects duplicates and any domain
/// registered through [`MemorySink::rejecting`].
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<String, PlatformTarget>>,
    rejected: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            rejected: domains
                .into_iter()
                .map(|d| {
                    let raw: String = d.into();
                    canonical_domain(&raw).unwrap_or_else(|_| raw.trim().to_ascii_lowercase())
                })
                .collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<PlatformTarget> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl PlatformSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, platform: &PlatformTarget) -> Result<(), SinkError> {
        let key = platform.dedup_key();
        if self.rejected.contains(&key) {
            return Err(SinkError::Constraint(format!("domain {key} is blocked")));
        }
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&key) {
            return Err(SinkError::Duplicate);
        }
        rows.insert(key, platform.clone());
        Ok(())
    }
}

/// One JSON document per venue under a hash-addressed path, written through a
/// temp file and hard-linked into place so that an existing document is never
/// replaced.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    root: PathBuf,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path_for(&self, domain_key: &str) -> PathBuf {
        let hash = sha256_hex(domain_key.as_bytes());
        PathBuf::from(&hash[..2]).join(format!("{hash}.json"))
    }

    pub async fn load(&self, domain_key: &str) -> Result<Option<PlatformTarget>, SinkError> {
        let path = self.root.join(self.relative_path_for(domain_key));
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let bytes = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl PlatformSink for JsonFileSink {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn upsert(&self, platform: &PlatformTarget) -> Result<(), SinkError> {
        let key = platform.dedup_key();
        let absolute_path = self.root.join(self.relative_path_for(&key));
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        if fs::try_exists(&absolute_path).await? {
            return Err(SinkError::Duplicate);
        }

        let bytes = serde_json::to_vec_pretty(platform)?;
        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        let published = fs::hard_link(&temp_path, &absolute_path).await;
        let _ = fs::remove_file(&temp_path).await;
        match published {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(SinkError::Duplicate),
            Err(err) => Err(SinkError::Io(err)),
        }
    }
}

/// Postgres sink: one `INSERT .. ON CONFLICT` per venue.
#[derive(Debug, Clone)]
pub struct PgPlatformSink {
    pool: PgPool,
}

impl PgPlatformSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn enum_text<T: serde::Serialize>(value: &T) -> Result<String, SinkError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

#[async_trait]
impl PlatformSink for PgPlatformSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, platform: &PlatformTarget) -> Result<(), SinkError> {
        if platform.domain_authority > 100 {
            return Err(SinkError::Constraint(format!(
                "domain authority {} out of range",
                platform.domain_authority
            )));
        }
        sqlx::query(
            r#"
            INSERT INTO platform_targets (
                domain, id, url, platform_type, submission_type, domain_authority,
                success_rate, avg_response_time_ms, requires_auth, allows_backlinks,
                has_form_detected, last_tested, difficulty, features, discovery_source, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (domain) DO UPDATE SET
                url = EXCLUDED.url,
                platform_type = EXCLUDED.platform_type,
                submission_type = EXCLUDED.submission_type,
                domain_authority = EXCLUDED.domain_authority,
                success_rate = EXCLUDED.success_rate,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms,
                requires_auth = EXCLUDED.requires_auth,
                allows_backlinks = EXCLUDED.allows_backlinks,
                has_form_detected = EXCLUDED.has_form_detected,
                last_tested = COALESCE(EXCLUDED.last_tested, platform_targets.last_tested),
                difficulty = EXCLUDED.difficulty,
                features = EXCLUDED.features,
                discovery_source = EXCLUDED.discovery_source,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            "#,
        )
        .bind(platform.dedup_key())
        .bind(platform.id)
        .bind(&platform.url)
        .bind(enum_text(&platform.platform_type)?)
        .bind(enum_text(&platform.submission_type)?)
        .bind(i16::from(platform.domain_authority))
        .bind(platform.success_rate)
        .bind(i64::try_from(platform.avg_response_time_ms).unwrap_or(i64::MAX))
        .bind(platform.requires_auth)
        .bind(platform.allows_backlinks)
        .bind(platform.has_form_detected)
        .bind(platform.last_tested)
        .bind(enum_text(&platform.difficulty)?)
        .bind(serde_json::to_value(&platform.features)?)
        .bind(&platform.discovery_source)
        .bind(serde_json::to_value(&platform.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
