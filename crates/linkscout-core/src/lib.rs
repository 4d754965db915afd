//! Core domain model for link-placement venue discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "linkscout-core";

/// Query count used by the query generator when the caller sets no limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Result size used by the deduplicator when the caller sets no limit.
pub const DEFAULT_RESULT_LIMIT: usize = 1000;

/// Authority hint appended to keyword-qualified queries when `minDA` is unset.
pub const DEFAULT_MIN_DA_HINT: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Web2,
    Directory,
    Bookmark,
    Profile,
    Forum,
    Blog,
    Social,
    Qa,
    Wiki,
    Other,
}

impl PlatformType {
    pub const ALL: [PlatformType; 10] = [
        PlatformType::Web2,
        PlatformType::Directory,
        PlatformType::Bookmark,
        PlatformType::Profile,
        PlatformType::Forum,
        PlatformType::Blog,
        PlatformType::Social,
        PlatformType::Qa,
        PlatformType::Wiki,
        PlatformType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Web2 => "web2",
            PlatformType::Directory => "directory",
            PlatformType::Bookmark => "bookmark",
            PlatformType::Profile => "profile",
            PlatformType::Forum => "forum",
            PlatformType::Blog => "blog",
            PlatformType::Social => "social",
            PlatformType::Qa => "qa",
            PlatformType::Wiki => "wiki",
            PlatformType::Other => "other",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PlatformType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| QueryError::UnknownPlatformType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionType {
    Form,
    Api,
    Comment,
    Profile,
    Post,
    Listing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModerationLevel {
    None,
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetadata {
    pub country: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub niche: BTreeSet<String>,
    #[serde(default)]
    pub submission_fields: Vec<String>,
    pub captcha_type: Option<String>,
    #[serde(default)]
    pub moderation_level: ModerationLevel,
}

/// One candidate link-placement venue.
///
/// `domain_authority`, `success_rate` and `avg_response_time_ms` are advisory
/// estimates filled in at discovery time; nothing in this workspace verifies
/// them. `last_tested` is written only by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformTarget {
    pub id: Uuid,
    pub domain: String,
    pub url: String,
    pub platform_type: PlatformType,
    pub submission_type: SubmissionType,
    pub domain_authority: u8,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub requires_auth: bool,
    pub allows_backlinks: bool,
    pub has_form_detected: bool,
    pub last_tested: Option<DateTime<Utc>>,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub discovery_source: String,
    #[serde(default)]
    pub metadata: PlatformMetadata,
}

impl PlatformTarget {
    /// Builds a candidate with explicit placeholder values for every estimate.
    pub fn placeholder(
        domain_or_url: &str,
        platform_type: PlatformType,
        discovery_source: &str,
    ) -> Result<Self, DomainError> {
        let domain = canonical_domain(domain_or_url)?;
        let trimmed = domain_or_url.trim();
        let url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            match trimmed.split_once('/') {
                Some((_, rest)) if !rest.is_empty() => format!("https://{domain}/{rest}"),
                _ => format!("https://{domain}"),
            }
        };
        Ok(Self {
            id: Uuid::new_v4(),
            domain,
            url,
            platform_type,
            submission_type: SubmissionType::Form,
            domain_authority: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0,
            requires_auth: false,
            allows_backlinks: true,
            has_form_detected: false,
            last_tested: None,
            difficulty: Difficulty::Medium,
            features: Vec::new(),
            discovery_source: discovery_source.to_string(),
            metadata: PlatformMetadata::default(),
        })
    }

    /// Key used to collapse duplicate venues.
    pub fn dedup_key(&self) -> String {
        canonical_domain(&self.domain).unwrap_or_else(|_| self.domain.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("empty domain")]
    Empty,
    #[error("unparseable domain {input:?}: {reason}")]
    Invalid { input: String, reason: String },
}

/// Lowercase host for a bare domain or a full URL.
pub fn canonical_domain(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&with_scheme).map_err(|e| DomainError::Invalid {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .unwrap_or_default();
    if host.is_empty() {
        return Err(DomainError::Invalid {
            input: input.to_string(),
            reason: "no host".to_string(),
        });
    }
    Ok(host)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{field} must be between 0 and 100, got {value}")]
    AuthorityOutOfRange { field: &'static str, value: u8 },
    #[error("minDA ({min}) is greater than maxDA ({max})")]
    InvertedAuthorityRange { min: u8, max: u8 },
    #[error("limit must be greater than zero")]
    ZeroLimit,
    #[error("keyword at index {0} is blank")]
    BlankKeyword(usize),
    #[error("unknown platform type {0:?}")]
    UnknownPlatformType(String),
}

/// Caller-facing discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default, rename = "minDA")]
    pub min_da: Option<u8>,
    #[serde(default, rename = "maxDA")]
    pub max_da: Option<u8>,
    #[serde(default)]
    pub platform_types: Option<Vec<PlatformType>>,
    #[serde(default)]
    pub requires_auth: Option<bool>,
    #[serde(default)]
    pub allows_backlinks: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl DiscoveryQuery {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_platform_types(mut self, types: impl IntoIterator<Item = PlatformType>) -> Self {
        self.platform_types = Some(types.into_iter().collect());
        self
    }

    pub fn with_authority_range(mut self, min_da: Option<u8>, max_da: Option<u8>) -> Self {
        self.min_da = min_da;
        self.max_da = max_da;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Rejects input no source adapter can reasonably act on.
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(min) = self.min_da {
            if min > 100 {
                return Err(QueryError::AuthorityOutOfRange { field: "minDA", value: min });
            }
        }
        if let Some(max) = self.max_da {
            if max > 100 {
                return Err(QueryError::AuthorityOutOfRange { field: "maxDA", value: max });
            }
        }
        if let (Some(min), Some(max)) = (self.min_da, self.max_da) {
            if min > max {
                return Err(QueryError::InvertedAuthorityRange { min, max });
            }
        }
        if self.limit == Some(0) {
            return Err(QueryError::ZeroLimit);
        }
        if let Some(idx) = self.keywords.iter().position(|k| k.trim().is_empty()) {
            return Err(QueryError::BlankKeyword(idx));
        }
        Ok(())
    }

    pub fn query_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }

    pub fn result_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RESULT_LIMIT)
    }

    pub fn min_da_hint(&self) -> u8 {
        self.min_da.unwrap_or(DEFAULT_MIN_DA_HINT)
    }

    /// Requested categories, or every known category in canonical order.
    pub fn selected_platform_types(&self) -> Vec<PlatformType> {
        match &self.platform_types {
            Some(types) => types.clone(),
            None => PlatformType::ALL.to_vec(),
        }
    }
}

/// One adapter that failed or was abandoned during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub platforms: Vec<PlatformTarget>,
    pub total_found: usize,
    pub search_queries: Vec<String>,
    pub processing_time_ms: u64,
    pub sources: Vec<String>,
    #[serde(default)]
    pub failures: Vec<SourceFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationExclusion {
    pub domain: String,
    pub url: String,
    pub reason: String,
    pub tested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validated: Vec<PlatformTarget>,
    pub excluded: Vec<ValidationExclusion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub added: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub total_platforms: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_difficulty: BTreeMap<String, usize>,
    #[serde(rename = "averageDA")]
    pub average_da: f64,
    pub success_rate: f64,
}

impl DiscoveryStats {
    pub fn from_platforms(platforms: &[PlatformTarget]) -> Self {
        if platforms.is_empty() {
            return Self::default();
        }
        let mut by_type = BTreeMap::new();
        let mut by_difficulty = BTreeMap::new();
        let mut da_sum = 0u64;
        let mut success_sum = 0.0;
        for p in platforms {
            *by_type.entry(p.platform_type.as_str().to_string()).or_default() += 1;
            *by_difficulty.entry(p.difficulty.as_str().to_string()).or_default() += 1;
            da_sum += u64::from(p.domain_authority);
            success_sum += p.success_rate;
        }
        let n = platforms.len() as f64;
        Self {
            total_platforms: platforms.len(),
            by_type,
            by_difficulty,
            average_da: da_sum as f64 / n,
            success_rate: success_sum / n,
        }
    }
}
