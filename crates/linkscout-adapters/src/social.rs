//! Social-signal discovery: venues where a keyword is already being shared.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkscout_core::PlatformType;
use tracing::warn;

use crate::{
    classify_text, estimate_candidate, AdapterContext, AdapterError, RequestPacer, SourceAdapter,
    SourceYield, DEFAULT_REQUEST_DELAY, SOCIAL_SOURCE_ID,
};

pub const SOCIAL_SIGNAL_FEATURE: &str = "social-signal";

#[derive(Debug, Clone, PartialEq)]
pub struct SocialMention {
    pub url: String,
    pub network: String,
    pub engagement: u32,
}

#[async_trait]
pub trait SocialMentionSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn mentions(&self, keyword: &str) -> Result<Vec<SocialMention>, AdapterError>;
}

/// Returns nothing until a [`SocialMentionSource`] is wired in.
pub struct SocialSignalAdapter {
    source: Option<Arc<dyn SocialMentionSource>>,
    min_engagement: u32,
    request_delay: Duration,
}

impl Default for SocialSignalAdapter {
    fn default() -> Self {
        Self::unwired()
    }
}

impl SocialSignalAdapter {
    pub fn unwired() -> Self {
        Self {
            source: None,
            min_engagement: 0,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn new(source: Arc<dyn SocialMentionSource>) -> Self {
        Self {
            source: Some(source),
            min_engagement: 0,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    /// Mentions below this engagement count are ignored.
    pub fn with_min_engagement(mut self, min_engagement: u32) -> Self {
        self.min_engagement = min_engagement;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

#[async_trait]
impl SourceAdapter for SocialSignalAdapter {
    fn source_id(&self) -> &'static str {
        SOCIAL_SOURCE_ID
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let Some(source) = &self.source else {
            return Ok(SourceYield::empty());
        };

        let keywords: Vec<&str> = ctx
            .query
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();

        let mut pacer = RequestPacer::new(self.request_delay);
        let mut candidates = Vec::new();
        let mut failed = 0usize;

        for keyword in &keywords {
            pacer.ready().await;
            let mentions = match source.mentions(keyword).await {
                Ok(mentions) => mentions,
                Err(err) => {
                    warn!(source = source.name(), keyword, %err, "social mention lookup failed");
                    failed += 1;
                    continue;
                }
            };
            for mention in mentions.into_iter().filter(|m| m.engagement >= self.min_engagement) {
                let platform_type = classify_text(&mention.url).unwrap_or(PlatformType::Social);
                if !ctx.wants(platform_type) {
                    continue;
                }
                let evidence = format!("{} {} {}", mention.network, mention.url, keyword);
                if let Some(mut candidate) = estimate_candidate(
                    &mention.url,
                    platform_type,
                    SOCIAL_SOURCE_ID,
                    &evidence,
                    ctx,
                    None,
                ) {
                    candidate.features.push(SOCIAL_SIGNAL_FEATURE.to_string());
                    candidates.push(candidate);
                }
            }
        }

        if !keywords.is_empty() && failed == keywords.len() {
            return Err(AdapterError::Message(format!(
                "all {failed} social mention lookups failed via {}",
                source.name()
            )));
        }
        Ok(SourceYield::from_candidates(candidates))
    }
}
