//! Competitor-derived discovery: venues hosting a competitor's backlinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkscout_core::PlatformType;
use tracing::warn;

use crate::{
    classify_text, estimate_candidate, AdapterContext, AdapterError, RequestPacer, SourceAdapter,
    SourceYield, COMPETITOR_SOURCE_ID, DEFAULT_REQUEST_DELAY,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BacklinkRef {
    pub source_url: String,
    pub anchor: Option<String>,
    pub domain_authority: Option<u8>,
}

#[async_trait]
pub trait BacklinkSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn backlinks(&self, competitor_domain: &str) -> Result<Vec<BacklinkRef>, AdapterError>;
}

/// Returns nothing until a [`BacklinkSource`] and competitor list are wired in.
pub struct CompetitorAdapter {
    source: Option<Arc<dyn BacklinkSource>>,
    competitors: Vec<String>,
    request_delay: Duration,
}

impl Default for CompetitorAdapter {
    fn default() -> Self {
        Self::unwired()
    }
}

impl CompetitorAdapter {
    pub fn unwired() -> Self {
        Self {
            source: None,
            competitors: Vec::new(),
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn new(source: Arc<dyn BacklinkSource>, competitors: Vec<String>) -> Self {
        Self {
            source: Some(source),
            competitors,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

#[async_trait]
impl SourceAdapter for CompetitorAdapter {
    fn source_id(&self) -> &'static str {
        COMPETITOR_SOURCE_ID
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let Some(source) = &self.source else {
            return Ok(SourceYield::empty());
        };

        let mut pacer = RequestPacer::new(self.request_delay);
        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for competitor in &self.competitors {
            pacer.ready().await;
            let links = match source.backlinks(competitor).await {
                Ok(links) => links,
                Err(err) => {
                    warn!(source = source.name(), competitor, %err, "backlink lookup failed");
                    failures.push(format!("{competitor}: {err}"));
                    continue;
                }
            };
            for link in links {
                let evidence = format!("{} {}", link.source_url, link.anchor.as_deref().unwrap_or(""));
                let platform_type = classify_text(&link.source_url).unwrap_or(PlatformType::Other);
                if !ctx.wants(platform_type) {
                    continue;
                }
                if let Some(candidate) = estimate_candidate(
                    &link.source_url,
                    platform_type,
                    COMPETITOR_SOURCE_ID,
                    &evidence,
                    ctx,
                    link.domain_authority,
                ) {
                    candidates.push(candidate);
                }
            }
        }

        if !self.competitors.is_empty() && failures.len() == self.competitors.len() {
            return Err(AdapterError::Message(format!(
                "every competitor lookup failed: {}",
                failures.join("; ")
            )));
        }
        Ok(SourceYield::from_candidates(candidates))
    }
}
