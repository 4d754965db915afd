//! Deduplication by canonical domain, query predicates and result bounding.

use std::collections::HashMap;

use linkscout_core::{DiscoveryQuery, PlatformTarget};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which candidate survives when several share a dedup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// First occurrence in merged order wins.
    #[default]
    FirstSeen,
    /// Highest `domain_authority` wins; ties keep the earlier candidate. The
    /// survivor takes the position of the first occurrence.
    HighestAuthority,
}

pub fn dedup(candidates: Vec<PlatformTarget>, policy: DedupPolicy) -> Vec<PlatformTarget> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<PlatformTarget> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = candidate.dedup_key();
        match slots.get(&key) {
            Some(&idx) => {
                if policy == DedupPolicy::HighestAuthority
                    && candidate.domain_authority > out[idx].domain_authority
                {
                    out[idx] = candidate;
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(candidate);
            }
        }
    }
    out
}

fn metadata_matches(wanted: Option<&Vec<String>>, actual: Option<&String>) -> bool {
    match (wanted, actual) {
        (Some(wanted), Some(actual)) if !wanted.is_empty() => {
            wanted.iter().any(|w| w.trim().eq_ignore_ascii_case(actual.trim()))
        }
        _ => true,
    }
}

/// All query predicates that are set, AND-combined.
pub fn matches_query(candidate: &PlatformTarget, query: &DiscoveryQuery) -> bool {
    if let Some(min) = query.min_da {
        if candidate.domain_authority < min {
            return false;
        }
    }
    if let Some(max) = query.max_da {
        if candidate.domain_authority > max {
            return false;
        }
    }
    if let Some(requires_auth) = query.requires_auth {
        if candidate.requires_auth != requires_auth {
            return false;
        }
    }
    if let Some(allows_backlinks) = query.allows_backlinks {
        if candidate.allows_backlinks != allows_backlinks {
            return false;
        }
    }
    if let Some(types) = &query.platform_types {
        if !types.contains(&candidate.platform_type) {
            return false;
        }
    }
    metadata_matches(query.countries.as_ref(), candidate.metadata.country.as_ref())
        && metadata_matches(query.languages.as_ref(), candidate.metadata.language.as_ref())
}

/// Dedup, then filter, then truncate to the query's result limit.
pub fn refine(
    candidates: Vec<PlatformTarget>,
    query: &DiscoveryQuery,
    policy: DedupPolicy,
) -> Vec<PlatformTarget> {
    let raw = candidates.len();
    let unique = dedup(candidates, policy);
    let unique_count = unique.len();
    let mut kept: Vec<_> = unique
        .into_iter()
        .filter(|c| {
            let keep = matches_query(c, query);
            if !keep {
                debug!(domain = %c.domain, "candidate filtered out");
            }
            keep
        })
        .collect();
    kept.truncate(query.result_limit());
    debug!(raw, unique = unique_count, kept = kept.len(), "refined candidates");
    kept
}
