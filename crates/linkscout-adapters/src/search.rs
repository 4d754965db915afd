//! Search-query adapter: one lookup per generated query, hits mapped to venue
//! guesses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    estimate_candidate, stable_unit, AdapterContext, AdapterError, RequestPacer, SourceAdapter,
    SourceYield, DEFAULT_REQUEST_DELAY, SEARCH_SOURCE_ID,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub domain_authority: Option<u8>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, AdapterError>;
}

pub struct SearchQueryAdapter {
    provider: Arc<dyn SearchProvider>,
    request_delay: Duration,
}

impl SearchQueryAdapter {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

#[async_trait]
impl SourceAdapter for SearchQueryAdapter {
    fn source_id(&self) -> &'static str {
        SEARCH_SOURCE_ID
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let mut pacer = RequestPacer::new(self.request_delay);
        let mut out = SourceYield::empty();
        let mut failures = 0usize;
        let mut last_error = None;

        for generated in &ctx.search_queries {
            pacer.ready().await;
            out.queries_used.push(generated.text.clone());

            let hits = match self.provider.search(&generated.text).await {
                Ok(hits) => hits,
                Err(err) => {
                    warn!(provider = self.provider.name(), query = %generated.text, %err, "search query failed");
                    failures += 1;
                    last_error = Some(err.to_string());
                    continue;
                }
            };

            for hit in hits {
                let evidence = format!("{} {} {}", generated.text, hit.title, hit.snippet);
                if let Some(candidate) = estimate_candidate(
                    &hit.url,
                    generated.platform_type,
                    SEARCH_SOURCE_ID,
                    &evidence,
                    ctx,
                    hit.domain_authority,
                ) {
                    out.candidates.push(candidate);
                }
            }
        }

        if failures > 0 && failures == ctx.search_queries.len() {
            return Err(AdapterError::Message(format!(
                "all {failures} search queries failed via {}: {}",
                self.provider.name(),
                last_error.unwrap_or_default()
            )));
        }

        debug!(
            queries = out.queries_used.len(),
            candidates = out.candidates.len(),
            failures,
            "search discovery finished"
        );
        Ok(out)
    }
}

const SIMULATED_DOMAINS: [&str; 9] = [
    "example-blog.com",
    "community-site.org",
    "user-directory.net",
    "submit-articles.com",
    "share-content.io",
    "publish-here.co",
    "content-platform.org",
    "writer-community.net",
    "blog-network.com",
];

/// Offline stand-in for a search API. Hits are derived from a hash of the
/// query so repeated runs agree.
#[derive(Debug, Clone)]
pub struct SimulatedSearchProvider {
    hits_per_query: usize,
}

impl Default for SimulatedSearchProvider {
    fn default() -> Self {
        Self { hits_per_query: 5 }
    }
}

impl SimulatedSearchProvider {
    pub fn new(hits_per_query: usize) -> Self {
        Self { hits_per_query }
    }
}

#[async_trait]
impl SearchProvider for SimulatedSearchProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, AdapterError> {
        Ok((0..self.hits_per_query)
            .map(|i| {
                let pick = (stable_unit(query, &format!("hit-{i}")) * SIMULATED_DOMAINS.len() as f64)
                    as usize;
                let domain = SIMULATED_DOMAINS[pick.min(SIMULATED_DOMAINS.len() - 1)];
                SearchHit {
                    url: format!("https://{domain}"),
                    title: format!("{domain} community"),
                    snippet: query.to_string(),
                    domain_authority: None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use linkscout_core::{DiscoveryQuery, PlatformType, SubmissionType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        calls: AtomicUsize,
        fail_every: Option<usize>,
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, AdapterError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(every) = self.fail_every {
                if n % every == 0 {
                    return Err(AdapterError::Message("quota exceeded".into()));
                }
            }
            Ok(vec![SearchHit {
                url: format!("https://venue{n}.example/submit"),
                title: "Leave a comment".into(),
                snippet: query.into(),
                domain_authority: Some(55),
            }])
        }
    }

    fn directory_ctx() -> AdapterContext {
        ctx(DiscoveryQuery::new(["seo"])
            .with_platform_types([PlatformType::Directory])
            .with_limit(6))
    }

    #[tokio::test]
    async fn maps_hits_into_candidates_in_query_order() {
        let provider = Arc::new(FixedProvider {
            calls: AtomicUsize::new(0),
            fail_every: None,
        });
        let adapter = SearchQueryAdapter::new(provider).with_request_delay(Duration::ZERO);
        let ctx = directory_ctx();
        let out = adapter.discover(&ctx).await.unwrap();

        assert_eq!(out.queries_used.len(), 6);
        assert_eq!(out.candidates.len(), 6);
        for (i, c) in out.candidates.iter().enumerate() {
            assert_eq!(c.domain, format!("venue{i}.example"));
            assert_eq!(c.platform_type, PlatformType::Directory);
            assert_eq!(c.submission_type, SubmissionType::Comment);
            assert_eq!(c.domain_authority, 55);
            assert_eq!(c.discovery_source, SEARCH_SOURCE_ID);
            assert!(c.features.contains(&"comments".to_string()));
        }
    }

    #[tokio::test]
    async fn partial_query_failures_are_skipped() {
        let provider = Arc::new(FixedProvider {
            calls: AtomicUsize::new(0),
            fail_every: Some(2),
        });
        let adapter = SearchQueryAdapter::new(provider).with_request_delay(Duration::ZERO);
        let out = adapter.discover(&directory_ctx()).await.unwrap();
        assert_eq!(out.queries_used.len(), 6);
        assert_eq!(out.candidates.len(), 3);
    }

    #[tokio::test]
    async fn total_failure_is_an_adapter_error() {
        let provider = Arc::new(FixedProvider {
            calls: AtomicUsize::new(0),
            fail_every: Some(1),
        });
        let adapter = SearchQueryAdapter::new(provider).with_request_delay(Duration::ZERO);
        let err = adapter.discover(&directory_ctx()).await.unwrap_err();
        assert!(err.to_string().contains("all 6 search queries failed"));
    }

    #[tokio::test]
    async fn simulated_provider_is_repeatable() {
        let provider = SimulatedSearchProvider::default();
        let a = provider.search("\"web directory\" \"seo\"").await.unwrap();
        let b = provider.search("\"web directory\" \"seo\"").await.unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert!(a
            .iter()
            .all(|h| SIMULATED_DOMAINS.iter().any(|d| h.url.ends_with(d))));
    }
}
