use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use linkscout_adapters::{
    AdapterContext, AdapterError, CompetitorAdapter, KnownNetworkAdapter, SearchHit, SearchProvider,
    SearchQueryAdapter, SimulatedSearchProvider, SitemapAdapter, SocialSignalAdapter, SourceAdapter,
    SourceYield, SEARCH_SOURCE_ID,
};
use linkscout_core::{DiscoveryQuery, PlatformTarget, PlatformType};
use linkscout_storage::MemorySink;
use linkscout_sync::{
    run_discovery_once, DiscoveryConfig, DiscoveryEngine, DiscoveryError, LivenessProber,
    ProbeVerdict, RunOptions,
};
use uuid::Uuid;

struct AlwaysLive;

#[async_trait]
impl LivenessProber for AlwaysLive {
    async fn check(&self, _target: &PlatformTarget) -> ProbeVerdict {
        ProbeVerdict::Live { form_detected: None }
    }
}

/// Hangs forever for one domain, live for the rest.
struct HangsFor(&'static str);

#[async_trait]
impl LivenessProber for HangsFor {
    async fn check(&self, target: &PlatformTarget) -> ProbeVerdict {
        if target.domain == self.0 {
            std::future::pending::<()>().await;
        }
        ProbeVerdict::Live { form_detected: None }
    }
}

struct Broken(&'static str);

#[async_trait]
impl SourceAdapter for Broken {
    fn source_id(&self) -> &'static str {
        self.0
    }

    async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        Err(AdapterError::Message("service unavailable".into()))
    }
}

struct Listed {
    id: &'static str,
    venues: Vec<(&'static str, PlatformType, u8)>,
}

#[async_trait]
impl SourceAdapter for Listed {
    fn source_id(&self) -> &'static str {
        self.id
    }

    async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        let candidates = self
            .venues
            .iter()
            .map(|(domain, platform_type, da)| {
                let mut t = PlatformTarget::placeholder(domain, *platform_type, self.id)
                    .map_err(|e| AdapterError::Message(e.to_string()))?;
                t.domain_authority = *da;
                Ok(t)
            })
            .collect::<Result<Vec<_>, AdapterError>>()?;
        Ok(SourceYield::from_candidates(candidates))
    }
}

fn standard_four() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(
            SearchQueryAdapter::new(Arc::new(SimulatedSearchProvider::default()))
                .with_request_delay(Duration::ZERO),
        ),
        Arc::new(KnownNetworkAdapter::builtin().with_request_delay(Duration::ZERO)),
        Arc::new(CompetitorAdapter::unwired()),
        Arc::new(SitemapAdapter::unwired()),
    ]
}

fn domains(platforms: &[PlatformTarget]) -> Vec<String> {
    platforms.iter().map(|p| p.domain.clone()).collect()
}

#[tokio::test]
async fn one_failing_adapter_leaves_the_rest_unchanged() {
    let query = DiscoveryQuery::new(["seo"]).with_limit(40);

    let mut healthy = standard_four();
    healthy.push(Arc::new(SocialSignalAdapter::unwired()));
    let baseline = DiscoveryEngine::builder()
        .adapters(healthy)
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap()
        .discover(&query)
        .await
        .unwrap();

    let mut with_broken = standard_four();
    with_broken.push(Arc::new(Broken("social_signals")));
    let degraded = DiscoveryEngine::builder()
        .adapters(with_broken)
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap()
        .discover(&query)
        .await
        .unwrap();

    assert_eq!(domains(&baseline.platforms), domains(&degraded.platforms));
    assert_eq!(baseline.search_queries, degraded.search_queries);
    assert!(!degraded.sources.contains(&"social_signals".to_string()));
    assert_eq!(degraded.failures.len(), 1);
    assert_eq!(degraded.failures[0].source, "social_signals");
    assert_eq!(baseline.sources.len(), 5);
}

#[tokio::test]
async fn malformed_query_fails_before_any_adapter_runs() {
    let engine = DiscoveryEngine::builder()
        .adapter(Arc::new(Broken("never")))
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();
    let query = DiscoveryQuery::new(["seo"]).with_authority_range(Some(80), Some(20));
    assert!(matches!(
        engine.discover(&query).await,
        Err(DiscoveryError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn duplicate_domain_across_sources_is_collapsed() {
    let engine = DiscoveryEngine::builder()
        .adapter(Arc::new(Listed {
            id: "first",
            venues: vec![
                ("alpha.com", PlatformType::Blog, 50),
                ("beta.com", PlatformType::Forum, 50),
                ("gamma.com", PlatformType::Wiki, 50),
            ],
        }))
        .adapter(Arc::new(Listed {
            id: "second",
            venues: vec![
                ("Beta.com", PlatformType::Directory, 90),
                ("delta.com", PlatformType::Profile, 50),
            ],
        }))
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();

    let result = engine.discover(&DiscoveryQuery::new(["seo"])).await.unwrap();
    assert_eq!(result.total_found, 4);
    assert_eq!(
        domains(&result.platforms),
        vec!["alpha.com", "beta.com", "gamma.com", "delta.com"]
    );
    let beta = &result.platforms[1];
    assert_eq!(beta.discovery_source, "first");
    assert_eq!(beta.platform_type, PlatformType::Forum);
}

#[tokio::test]
async fn every_output_candidate_satisfies_the_query() {
    let engine = DiscoveryEngine::builder()
        .adapters(standard_four())
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();
    let query = DiscoveryQuery {
        requires_auth: Some(false),
        allows_backlinks: Some(true),
        ..DiscoveryQuery::new(["seo", "marketing"])
            .with_authority_range(Some(50), Some(70))
            .with_platform_types([PlatformType::Directory, PlatformType::Forum])
    };
    let result = engine.discover(&query).await.unwrap();

    assert!(!result.platforms.is_empty());
    for p in &result.platforms {
        assert!((50..=70).contains(&p.domain_authority), "{} has DA {}", p.domain, p.domain_authority);
        assert!(!p.requires_auth);
        assert!(p.allows_backlinks);
        assert!(matches!(p.platform_type, PlatformType::Directory | PlatformType::Forum));
    }
    let keys: HashSet<_> = result.platforms.iter().map(|p| p.dedup_key()).collect();
    assert_eq!(keys.len(), result.platforms.len());
}

#[tokio::test(start_paused = true)]
async fn hung_probe_is_excluded_wherever_it_sits() {
    for position in 0..3 {
        let mut venues = vec![
            ("one.com", PlatformType::Blog, 50),
            ("two.com", PlatformType::Blog, 50),
        ];
        venues.insert(position, ("stuck.com", PlatformType::Blog, 50));
        let engine = DiscoveryEngine::builder()
            .adapter(Arc::new(Listed { id: "listed", venues }))
            .prober(Arc::new(HangsFor("stuck.com")))
            .probe_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let result = engine.discover(&DiscoveryQuery::new(["seo"])).await.unwrap();
        let report = engine.validate(result.platforms).await;
        assert_eq!(domains(&report.validated), vec!["one.com", "two.com"]);
        assert!(report.validated.iter().all(|p| p.last_tested.is_some()));
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].domain, "stuck.com");
    }
}

#[tokio::test]
async fn ingestion_counts_partial_failures() {
    let engine = DiscoveryEngine::builder()
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();
    let platforms: Vec<_> = ["a.com", "b.com", "c.com", "d.com", "e.com", "f.com"]
        .iter()
        .map(|d| PlatformTarget::placeholder(d, PlatformType::Web2, "test").unwrap())
        .collect();
    let sink = MemorySink::rejecting(["b.com", "e.com"]);

    let report = engine.ingest(&sink, &platforms).await;
    assert_eq!(report.added, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(sink.len().await, 4);
}

#[tokio::test]
async fn full_run_writes_reports_and_ingests_validated_set() {
    let dir = tempfile::tempdir().unwrap();
    let reports_dir = dir.path().to_path_buf();
    let config = DiscoveryConfig::from_lookup(move |key| match key {
        "LINKSCOUT_REPORTS_DIR" => Some(reports_dir.display().to_string()),
        _ => None,
    });
    let engine = DiscoveryEngine::builder()
        .adapter(Arc::new(Listed {
            id: "listed",
            venues: vec![
                ("stuck.com", PlatformType::Wiki, 60),
                ("live.com", PlatformType::Wiki, 60),
            ],
        }))
        .prober(Arc::new(HangsFor("stuck.com")))
        .probe_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let sink = Arc::new(MemorySink::new());

    let outcome = run_discovery_once(
        &engine,
        &config,
        &DiscoveryQuery::new(["seo"]),
        &RunOptions {
            validate: true,
            sink: Some(sink.clone()),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.result.total_found, 2);
    let ingestion = outcome.ingestion.unwrap();
    assert_eq!(ingestion.added, 1);
    assert_eq!(domains(&sink.snapshot().await), vec!["live.com"]);
    assert!(outcome.reports.result_json.exists());
    assert!(outcome.reports.summary_md.exists());
    assert!(outcome.reports.parquet_manifest.exists());
}

/// Answers the first query with five hits, one of them a second URL on an
/// already listed host; every later query comes back empty.
#[derive(Default)]
struct FiveHits {
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for FiveHits {
    fn name(&self) -> &'static str {
        "five-hits"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, AdapterError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(Vec::new());
        }
        let hit = |url: &str, da: u8| SearchHit {
            url: url.to_string(),
            title: "Add your site".to_string(),
            snippet: "free directory listing".to_string(),
            domain_authority: Some(da),
        };
        Ok(vec![
            hit("https://listings-one.com/submit", 42),
            hit("https://listings-two.org/add-url", 55),
            hit("https://Listings-One.com/add-listing", 61),
            hit("https://local-biz.net/submit-site", 70),
            hit("https://niche-dir.io/add", 79),
        ])
    }
}

#[tokio::test]
async fn keyword_to_unique_directory_venues() {
    let provider = Arc::new(FiveHits::default());
    let engine = DiscoveryEngine::builder()
        .adapter(Arc::new(
            SearchQueryAdapter::new(provider.clone()).with_request_delay(Duration::ZERO),
        ))
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();
    let query = DiscoveryQuery::new(["seo"])
        .with_platform_types([PlatformType::Directory])
        .with_limit(20);

    let result = engine.discover(&query).await.unwrap();

    assert_eq!(result.search_queries.len(), 20);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 20);
    assert_eq!(result.sources, vec![SEARCH_SOURCE_ID.to_string()]);
    assert_eq!(result.total_found, 4);
    assert_eq!(
        domains(&result.platforms),
        vec!["listings-one.com", "listings-two.org", "local-biz.net", "niche-dir.io"]
    );
    assert_eq!(result.platforms[0].domain_authority, 42);
    for p in &result.platforms {
        assert_eq!(p.platform_type, PlatformType::Directory);
        assert!((40..80).contains(&p.domain_authority));
    }
}

struct RecordsRunId(Mutex<Option<Uuid>>);

#[async_trait]
impl SourceAdapter for RecordsRunId {
    fn source_id(&self) -> &'static str {
        "recorder"
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
        *self.0.lock().unwrap() = Some(ctx.run_id);
        Ok(SourceYield::empty())
    }
}

#[tokio::test]
async fn run_id_is_shared_by_adapters_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let reports_dir = dir.path().to_path_buf();
    let config = DiscoveryConfig::from_lookup(move |key| match key {
        "LINKSCOUT_REPORTS_DIR" => Some(reports_dir.display().to_string()),
        _ => None,
    });
    let recorder = Arc::new(RecordsRunId(Mutex::new(None)));
    let engine = DiscoveryEngine::builder()
        .adapter(recorder.clone())
        .prober(Arc::new(AlwaysLive))
        .build()
        .unwrap();

    let outcome = run_discovery_once(&engine, &config, &DiscoveryQuery::new(["seo"]), &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(*recorder.0.lock().unwrap(), Some(outcome.run_id));
    assert!(outcome
        .reports
        .reports_dir
        .ends_with(outcome.run_id.to_string()));
}
