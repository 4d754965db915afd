//! Source adapter contracts plus the five venue discovery techniques.
//!
//! Every adapter turns an [`AdapterContext`] into a [`SourceYield`] or an
//! [`AdapterError`]. Adapters never panic on collaborator failure; the
//! aggregator treats an `Err` as "this source contributed nothing".

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use linkscout_core::{
    Difficulty, DiscoveryQuery, ModerationLevel, PlatformTarget, PlatformType, SubmissionType,
};
use linkscout_storage::{sha256_hex, FetchError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

pub mod competitor;
pub mod network;
pub mod queries;
pub mod search;
pub mod sitemap;
pub mod social;

pub use competitor::{BacklinkRef, BacklinkSource, CompetitorAdapter};
pub use network::{builtin_networks, load_networks_yaml, KnownNetworkAdapter, NetworkExpander, SeedNetwork};
pub use queries::{generate_queries, templates_for, GeneratedQuery};
pub use search::{SearchHit, SearchProvider, SearchQueryAdapter, SimulatedSearchProvider};
pub use sitemap::{parse_sitemap_locs, HttpSitemapFetcher, SitemapAdapter, SitemapFetcher};
pub use social::{SocialMention, SocialMentionSource, SocialSignalAdapter};

pub const CRATE_NAME: &str = "linkscout-adapters";

/// Delay enforced between dependent requests inside one adapter invocation.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

pub const SEARCH_SOURCE_ID: &str = "search_engines";
pub const NETWORK_SOURCE_ID: &str = "platform_database";
pub const COMPETITOR_SOURCE_ID: &str = "competitor_analysis";
pub const SITEMAP_SOURCE_ID: &str = "sitemap_crawling";
pub const SOCIAL_SOURCE_ID: &str = "social_signals";

/// Everything an adapter may read during one discovery run.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub query: DiscoveryQuery,
    pub search_queries: Vec<GeneratedQuery>,
}

impl AdapterContext {
    pub fn new(query: DiscoveryQuery) -> Self {
        let search_queries = generate_queries(&query);
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            query,
            search_queries,
        }
    }

    /// Ties the adapters' spans to a run id chosen by the caller.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Whether the caller asked for venues of this category.
    pub fn wants(&self, platform_type: PlatformType) -> bool {
        match &self.query.platform_types {
            Some(types) => types.contains(&platform_type),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceYield {
    pub candidates: Vec<PlatformTarget>,
    pub queries_used: Vec<String>,
}

impl SourceYield {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_candidates(candidates: Vec<PlatformTarget>) -> Self {
        Self {
            candidates,
            queries_used: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError>;
}

/// Fixed-delay pacing scoped to a single adapter invocation. Each call site
/// owns its pacer, so concurrent runs never contend on shared timer state.
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    last: Option<Instant>,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// Waits until `delay` has passed since the previous call. The first call
    /// returns immediately.
    pub async fn ready(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Deterministic value in `[0, 1)` derived from `seed` and `salt`.
pub(crate) fn stable_unit(seed: &str, salt: &str) -> f64 {
    let hex = sha256_hex(format!("{seed}|{salt}").as_bytes());
    let bits = u64::from_str_radix(&hex[..16], 16).unwrap_or(0);
    (bits >> 11) as f64 / (1u64 << 53) as f64
}

/// Keyword guess at a venue category from free text (query, title, URL).
pub fn classify_text(text: &str) -> Option<PlatformType> {
    let lower = text.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if has(&["blog"]) {
        Some(PlatformType::Blog)
    } else if has(&["forum", "message board", "discussion"]) {
        Some(PlatformType::Forum)
    } else if has(&["directory", "add-url", "addurl", "listing"]) {
        Some(PlatformType::Directory)
    } else if has(&["bookmark"]) {
        Some(PlatformType::Bookmark)
    } else if has(&["profile", "/user/", "/member"]) {
        Some(PlatformType::Profile)
    } else if has(&["wiki"]) {
        Some(PlatformType::Wiki)
    } else if has(&["q&a", "questions", "answers"]) {
        Some(PlatformType::Qa)
    } else {
        None
    }
}

pub fn detect_features(text: &str) -> Vec<String> {
    let lower = text.to_ascii_lowercase();
    let mut features = Vec::new();
    if lower.contains("comment") {
        features.push("comments".to_string());
    }
    if lower.contains("register") || lower.contains("sign up") || lower.contains("signup") {
        features.push("registration".to_string());
    }
    if lower.contains("submit") {
        features.push("submission".to_string());
    }
    if lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "api")
    {
        features.push("api".to_string());
    }
    features
}

fn requires_auth_hint(lower: &str) -> bool {
    ["register", "sign up", "signup", "create account", "login", "log in", "join"]
        .iter()
        .any(|n| lower.contains(n))
}

fn submission_type_for(platform_type: PlatformType, features: &[String]) -> SubmissionType {
    if features.iter().any(|f| f == "comments") {
        return SubmissionType::Comment;
    }
    match platform_type {
        PlatformType::Directory => SubmissionType::Listing,
        PlatformType::Profile => SubmissionType::Profile,
        PlatformType::Forum | PlatformType::Qa | PlatformType::Wiki => SubmissionType::Post,
        _ => SubmissionType::Form,
    }
}

fn submission_fields_for(submission_type: SubmissionType) -> Vec<String> {
    let fields: &[&str] = match submission_type {
        SubmissionType::Form => &["name", "email", "url"],
        SubmissionType::Comment => &["name", "email", "website", "comment"],
        SubmissionType::Listing => &["business_name", "url", "category", "description"],
        SubmissionType::Profile => &["username", "email", "bio", "website"],
        SubmissionType::Post => &["title", "body"],
        SubmissionType::Api => &[],
    };
    fields.iter().map(|f| f.to_string()).collect()
}

fn difficulty_for(requires_auth: bool, moderation: ModerationLevel) -> Difficulty {
    match (requires_auth, moderation) {
        (true, ModerationLevel::Manual) => Difficulty::Hard,
        (false, ModerationLevel::None | ModerationLevel::Auto) => Difficulty::Easy,
        _ => Difficulty::Medium,
    }
}

/// Builds a candidate whose estimates are seeded from `evidence` so the same
/// input always yields the same guesses. `authority` overrides the sampled
/// domain authority when the source knows a real figure.
pub(crate) fn estimate_candidate(
    domain_or_url: &str,
    platform_type: PlatformType,
    source_id: &str,
    evidence: &str,
    ctx: &AdapterContext,
    authority: Option<u8>,
) -> Option<PlatformTarget> {
    let mut target = match PlatformTarget::placeholder(domain_or_url, platform_type, source_id) {
        Ok(target) => target,
        Err(err) => {
            debug!(source_id, input = domain_or_url, %err, "skipping unparseable venue");
            return None;
        }
    };
    let seed = format!("{}|{}", target.domain, evidence);
    let lower = evidence.to_ascii_lowercase();

    let sampled = u32::from(ctx.query.min_da_hint()) + (stable_unit(&seed, "da") * 40.0) as u32;
    target.domain_authority = authority.unwrap_or(sampled.min(100) as u8).min(100);
    target.success_rate = (stable_unit(&seed, "success") * 1000.0).floor() / 10.0;
    target.avg_response_time_ms = 500 + (stable_unit(&seed, "latency") * 3000.0) as u64;

    target.features = detect_features(evidence);
    target.submission_type = submission_type_for(platform_type, &target.features);
    target.requires_auth = requires_auth_hint(&lower);
    target.allows_backlinks = !lower.contains("nofollow");

    let moderation = if lower.contains("moderat") || lower.contains("approval") {
        ModerationLevel::Manual
    } else {
        match (stable_unit(&seed, "moderation") * 3.0) as u8 {
            0 => ModerationLevel::None,
            1 => ModerationLevel::Auto,
            _ => ModerationLevel::Manual,
        }
    };
    target.difficulty = difficulty_for(target.requires_auth, moderation);

    target.metadata.country = Some(
        ctx.query
            .countries
            .as_ref()
            .and_then(|c| c.first().cloned())
            .unwrap_or_else(|| "US".to_string()),
    );
    target.metadata.language = Some(
        ctx.query
            .languages
            .as_ref()
            .and_then(|l| l.first().cloned())
            .unwrap_or_else(|| "en".to_string()),
    );
    target.metadata.niche = ctx
        .query
        .keywords
        .iter()
        .map(|k| k.trim().to_ascii_lowercase())
        .collect::<BTreeSet<_>>();
    target.metadata.submission_fields = submission_fields_for(target.submission_type);
    target.metadata.moderation_level = moderation;

    Some(target)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn ctx(query: DiscoveryQuery) -> AdapterContext {
        AdapterContext::new(query)
    }
}
