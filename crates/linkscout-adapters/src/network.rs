//! Known-network expansion: seed venues grouped by category, optionally
//! expanded into related venues by a wired-in expander.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use linkscout_core::{PlatformTarget, PlatformType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    estimate_candidate, AdapterContext, AdapterError, RequestPacer, SourceAdapter, SourceYield,
    DEFAULT_REQUEST_DELAY, NETWORK_SOURCE_ID,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedNetwork {
    pub category: String,
    pub platform_type: PlatformType,
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NetworksFile {
    networks: Vec<SeedNetwork>,
}

fn seed(category: &str, platform_type: PlatformType, domains: &[&str]) -> SeedNetwork {
    SeedNetwork {
        category: category.to_string(),
        platform_type,
        domains: domains.iter().map(|d| d.to_string()).collect(),
    }
}

pub fn builtin_networks() -> Vec<SeedNetwork> {
    vec![
        seed(
            "web2_platforms",
            PlatformType::Web2,
            &[
                "blogger.com", "wordpress.com", "medium.com", "tumblr.com", "wix.com",
                "weebly.com", "jimdo.com", "site123.com", "webflow.com", "ghost.org",
                "notion.so", "gitbook.io", "dev.to", "hashnode.com", "write.as",
                "telegraph.ph", "substack.com", "beehiiv.com", "convertkit.com",
            ],
        ),
        seed(
            "social_bookmarking",
            PlatformType::Bookmark,
            &[
                "reddit.com", "pinterest.com", "mix.com", "flipboard.com", "scoop.it",
                "pocket.com", "digg.com", "stumbleupon.com", "folkd.com", "bibsonomy.org",
                "delicious.com", "slashdot.org", "fark.com", "newsvine.com",
            ],
        ),
        seed(
            "directories",
            PlatformType::Directory,
            &[
                "dmoz.org", "yahoo.com/dir", "botw.org", "gimpsy.com", "exact-seek.com",
                "jayde.com", "business.com", "brownbook.net", "hotfrog.com", "cylex.com",
                "foursquare.com", "yelp.com", "yellowpages.com", "superpages.com",
            ],
        ),
        seed(
            "forums",
            PlatformType::Forum,
            &[
                "reddit.com", "quora.com", "stackoverflow.com", "warriorforum.com",
                "blackhatworld.com", "digitalpoint.com", "webmasterworld.com",
                "searchenginewatch.com", "seroundtable.com", "moz.com/community",
            ],
        ),
        seed(
            "profile_sites",
            PlatformType::Profile,
            &[
                "about.me", "gravatar.com", "behance.net", "dribbble.com", "github.com",
                "linkedin.com", "crunchbase.com", "angel.co", "f6s.com", "xing.com",
                "meetup.com", "eventbrite.com", "slideshare.net", "speaker-deck.com",
            ],
        ),
    ]
}

pub fn load_networks_yaml(path: impl AsRef<Path>) -> anyhow::Result<Vec<SeedNetwork>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: NetworksFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(parsed.networks)
}

/// Finds sibling or related venues for a known seed (subdomains, network
/// sites, lookalikes).
#[async_trait]
pub trait NetworkExpander: Send + Sync {
    fn name(&self) -> &'static str;

    async fn expand(
        &self,
        seed: &PlatformTarget,
        ctx: &AdapterContext,
    ) -> Result<Vec<PlatformTarget>, AdapterError>;
}

pub struct KnownNetworkAdapter {
    networks: Vec<SeedNetwork>,
    expander: Option<Arc<dyn NetworkExpander>>,
    request_delay: Duration,
}

impl KnownNetworkAdapter {
    pub fn new(networks: Vec<SeedNetwork>) -> Self {
        Self {
            networks,
            expander: None,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_networks())
    }

    pub fn with_expander(mut self, expander: Arc<dyn NetworkExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn networks(&self) -> &[SeedNetwork] {
        &self.networks
    }
}

#[async_trait]
impl SourceAdapter for KnownNetworkAdapter {
    fn source_id(&self) -> &'static str {
        NETWORK_SOURCE_ID
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let mut pacer = RequestPacer::new(self.request_delay);
        let mut candidates = Vec::new();

        for network in self.networks.iter().filter(|n| ctx.wants(n.platform_type)) {
            for domain in &network.domains {
                let Some(seed) = estimate_candidate(
                    domain,
                    network.platform_type,
                    NETWORK_SOURCE_ID,
                    &network.category,
                    ctx,
                    None,
                ) else {
                    continue;
                };

                if let Some(expander) = &self.expander {
                    pacer.ready().await;
                    match expander.expand(&seed, ctx).await {
                        Ok(related) => {
                            debug!(seed = %seed.domain, related = related.len(), "expanded seed");
                            candidates.push(seed);
                            candidates.extend(related);
                            continue;
                        }
                        Err(err) => {
                            warn!(expander = expander.name(), seed = %seed.domain, %err, "seed expansion failed");
                        }
                    }
                }
                candidates.push(seed);
            }
        }

        Ok(SourceYield::from_candidates(candidates))
    }
}
