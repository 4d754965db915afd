//! Sitemap-derived discovery: submission endpoints found in known venues'
//! sitemaps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkscout_storage::HttpFetcher;
use scraper::{Html, Selector};
use tracing::warn;

use crate::network::SeedNetwork;
use crate::{
    classify_text, estimate_candidate, AdapterContext, AdapterError, RequestPacer, SourceAdapter,
    SourceYield, DEFAULT_REQUEST_DELAY, SITEMAP_SOURCE_ID,
};

/// Path fragments that mark a page as a place to submit content.
pub const SUBMISSION_PATH_MARKERS: [&str; 8] = [
    "/submit",
    "/add-url",
    "/addurl",
    "/register",
    "/signup",
    "/contribute",
    "/write-for-us",
    "/add-listing",
];

#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sitemap_urls(&self, domain: &str, ctx: &AdapterContext) -> Result<Vec<String>, AdapterError>;
}

pub fn parse_sitemap_locs(xml: &str) -> Result<Vec<String>, AdapterError> {
    let document = Html::parse_document(xml);
    let sel = Selector::parse("loc").map_err(|e| AdapterError::Message(e.to_string()))?;
    Ok(document
        .select(&sel)
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Downloads `<scheme>://<domain>/sitemap.xml` through the shared fetcher.
pub struct HttpSitemapFetcher {
    http: Arc<HttpFetcher>,
    scheme: String,
}

impl HttpSitemapFetcher {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            scheme: "https".to_string(),
        }
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }
}

#[async_trait]
impl SitemapFetcher for HttpSitemapFetcher {
    fn name(&self) -> &'static str {
        "http-sitemap"
    }

    async fn sitemap_urls(&self, domain: &str, ctx: &AdapterContext) -> Result<Vec<String>, AdapterError> {
        let url = format!("{}://{}/sitemap.xml", self.scheme, domain.trim_end_matches('/'));
        let fetched = self.http.fetch_bytes(ctx.run_id, SITEMAP_SOURCE_ID, &url).await?;
        parse_sitemap_locs(&String::from_utf8_lossy(&fetched.body))
    }
}

fn is_submission_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    SUBMISSION_PATH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Returns nothing until a [`SitemapFetcher`] is wired in.
pub struct SitemapAdapter {
    fetcher: Option<Arc<dyn SitemapFetcher>>,
    targets: Vec<SeedNetwork>,
    request_delay: Duration,
}

impl Default for SitemapAdapter {
    fn default() -> Self {
        Self::unwired()
    }
}

impl SitemapAdapter {
    pub fn unwired() -> Self {
        Self {
            fetcher: None,
            targets: Vec::new(),
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn new(fetcher: Arc<dyn SitemapFetcher>, targets: Vec<SeedNetwork>) -> Self {
        Self {
            fetcher: Some(fetcher),
            targets,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

#[async_trait]
impl SourceAdapter for SitemapAdapter {
    fn source_id(&self) -> &'static str {
        SITEMAP_SOURCE_ID
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let Some(fetcher) = &self.fetcher else {
            return Ok(SourceYield::empty());
        };

        let mut pacer = RequestPacer::new(self.request_delay);
        let mut candidates = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for network in &self.targets {
            for domain in &network.domains {
                attempted += 1;
                pacer.ready().await;
                let urls = match fetcher.sitemap_urls(domain, ctx).await {
                    Ok(urls) => urls,
                    Err(err) => {
                        warn!(fetcher = fetcher.name(), domain, %err, "sitemap fetch failed");
                        failed += 1;
                        continue;
                    }
                };
                for url in urls.iter().filter(|u| is_submission_url(u)) {
                    let platform_type = classify_text(url).unwrap_or(network.platform_type);
                    if !ctx.wants(platform_type) {
                        continue;
                    }
                    if let Some(candidate) =
                        estimate_candidate(url, platform_type, SITEMAP_SOURCE_ID, url, ctx, None)
                    {
                        candidates.push(candidate);
                    }
                }
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(AdapterError::Message(format!(
                "all {attempted} sitemap fetches failed"
            )));
        }
        Ok(SourceYield::from_candidates(candidates))
    }
}
