//! Liveness validation of refined candidates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use linkscout_core::{PlatformTarget, ValidationExclusion, ValidationReport};
use linkscout_storage::HttpFetcher;
use scraper::{Html, Selector};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

const VALIDATOR_SOURCE_ID: &str = "validator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// `form_detected` is `None` when the prober did not look.
    Live { form_detected: Option<bool> },
    Dead { reason: String },
}

#[async_trait]
pub trait LivenessProber: Send + Sync {
    async fn check(&self, target: &PlatformTarget) -> ProbeVerdict;

    /// Enrichment run after a live verdict that did not already report a
    /// form. `None` leaves `has_form_detected` untouched.
    async fn detect_form(&self, _target: &PlatformTarget) -> Option<bool> {
        None
    }
}

/// HEAD-probes the candidate URL and optionally fetches the page to look for
/// a `<form>`.
pub struct HttpProber {
    http: Arc<HttpFetcher>,
    timeout: Duration,
    detect_forms: bool,
    run_id: Uuid,
}

impl HttpProber {
    pub fn new(http: Arc<HttpFetcher>, timeout: Duration) -> Self {
        Self {
            http,
            timeout,
            detect_forms: false,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_form_detection(mut self, enabled: bool) -> Self {
        self.detect_forms = enabled;
        self
    }

    async fn page_has_form(&self, url: &str) -> Option<bool> {
        if !self.detect_forms {
            return None;
        }
        let fetched = match self.http.fetch_bytes(self.run_id, VALIDATOR_SOURCE_ID, url).await {
            Ok(fetched) => fetched,
            Err(err) => {
                debug!(url, %err, "form detection fetch failed");
                return None;
            }
        };
        let document = Html::parse_document(&String::from_utf8_lossy(&fetched.body));
        let selector = Selector::parse("form").ok()?;
        let found = document.select(&selector).next().is_some();
        Some(found)
    }
}

#[async_trait]
impl LivenessProber for HttpProber {
    async fn check(&self, target: &PlatformTarget) -> ProbeVerdict {
        match self.http.probe(&target.url, self.timeout).await {
            Ok(resp) if resp.status.is_success() => ProbeVerdict::Live { form_detected: None },
            Ok(resp) => ProbeVerdict::Dead {
                reason: format!("HTTP {}", resp.status.as_u16()),
            },
            Err(err) => ProbeVerdict::Dead {
                reason: err.to_string(),
            },
        }
    }

    async fn detect_form(&self, target: &PlatformTarget) -> Option<bool> {
        self.page_has_form(&target.url).await
    }
}

pub struct Validator {
    prober: Arc<dyn LivenessProber>,
    probe_timeout: Duration,
    concurrency: usize,
}

impl Validator {
    pub fn new(prober: Arc<dyn LivenessProber>) -> Self {
        Self {
            prober,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    /// Upper bound on a single liveness check, applied on top of whatever
    /// timeout the prober enforces itself. Form detection gets its own
    /// budget of the same length and never excludes a candidate.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Probes every candidate independently. Live candidates come back in
    /// input order with `last_tested` stamped; the rest are listed as
    /// exclusions.
    pub async fn validate(&self, candidates: Vec<PlatformTarget>) -> ValidationReport {
        let total = candidates.len();
        let probe_timeout = self.probe_timeout;
        let results: Vec<(PlatformTarget, ProbeVerdict)> = stream::iter(candidates)
            .map(|candidate| {
                let prober = Arc::clone(&self.prober);
                async move {
                    let verdict =
                        match tokio::time::timeout(probe_timeout, prober.check(&candidate)).await {
                            Ok(verdict) => verdict,
                            Err(_) => ProbeVerdict::Dead {
                                reason: format!(
                                    "probe timed out after {} ms",
                                    probe_timeout.as_millis()
                                ),
                            },
                        };
                    let verdict = match verdict {
                        ProbeVerdict::Live { form_detected: None } => {
                            let form_detected =
                                tokio::time::timeout(probe_timeout, prober.detect_form(&candidate))
                                    .await
                                    .unwrap_or_else(|_| {
                                        debug!(domain = %candidate.domain, "form detection timed out");
                                        None
                                    });
                            ProbeVerdict::Live { form_detected }
                        }
                        other => other,
                    };
                    (candidate, verdict)
                }
            })
            .buffered(self.concurrency.max(1))
            .collect()
            .await;

        let mut report = ValidationReport::default();
        for (mut candidate, verdict) in results {
            let tested_at = Utc::now();
            match verdict {
                ProbeVerdict::Live { form_detected } => {
                    candidate.last_tested = Some(tested_at);
                    if let Some(found) = form_detected {
                        candidate.has_form_detected = found;
                    }
                    report.validated.push(candidate);
                }
                ProbeVerdict::Dead { reason } => {
                    debug!(domain = %candidate.domain, %reason, "candidate excluded by validation");
                    report.excluded.push(ValidationExclusion {
                        domain: candidate.domain,
                        url: candidate.url,
                        reason,
                        tested_at,
                    });
                }
            }
        }
        info!(
            total,
            live = report.validated.len(),
            excluded = report.excluded.len(),
            "validation finished"
        );
        report
    }
}
