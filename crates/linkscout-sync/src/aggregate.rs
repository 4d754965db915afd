//! Fan-out over every registered source adapter with per-adapter failure
//! isolation.

use std::sync::Arc;
use std::time::Duration;

use linkscout_adapters::{AdapterContext, AdapterError, SourceAdapter, SourceYield};
use linkscout_core::{PlatformTarget, SourceFailure};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub candidates: Vec<PlatformTarget>,
    pub search_queries: Vec<String>,
    pub sources: Vec<String>,
    pub failures: Vec<SourceFailure>,
}

enum Outcome {
    Finished(Result<SourceYield, AdapterError>),
    DeadlineExceeded(Duration),
}

/// Runs adapters concurrently but merges their output in registration order,
/// so the merged candidate order is the same on every run.
#[derive(Clone, Default)]
pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    deadline: Option<Duration>,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters,
            deadline: None,
        }
    }

    /// Adapters still running when `deadline` elapses are abandoned and
    /// reported as failures.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn push(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn source_ids(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.source_id()).collect()
    }

    pub async fn run(&self, ctx: Arc<AdapterContext>) -> Aggregation {
        let handles: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let ctx = Arc::clone(&ctx);
                let deadline = self.deadline;
                let source_id = adapter.source_id();
                let handle = tokio::spawn(async move {
                    let work = adapter.discover(&ctx);
                    match deadline {
                        Some(limit) => match tokio::time::timeout(limit, work).await {
                            Ok(result) => Outcome::Finished(result),
                            Err(_) => Outcome::DeadlineExceeded(limit),
                        },
                        None => Outcome::Finished(work.await),
                    }
                });
                (source_id, handle)
            })
            .collect();

        let mut out = Aggregation::default();
        for (source_id, handle) in handles {
            let message = match handle.await {
                Ok(Outcome::Finished(Ok(yielded))) => {
                    info!(
                        run_id = %ctx.run_id,
                        source_id,
                        candidates = yielded.candidates.len(),
                        "source adapter finished"
                    );
                    out.candidates.extend(yielded.candidates);
                    out.search_queries.extend(yielded.queries_used);
                    out.sources.push(source_id.to_string());
                    continue;
                }
                Ok(Outcome::Finished(Err(err))) => err.to_string(),
                Ok(Outcome::DeadlineExceeded(limit)) => {
                    format!("abandoned after {} ms deadline", limit.as_millis())
                }
                Err(join_err) if join_err.is_panic() => "adapter panicked".to_string(),
                Err(join_err) => format!("adapter task failed: {join_err}"),
            };
            warn!(run_id = %ctx.run_id, source_id, error = %message, "source adapter failed");
            out.failures.push(SourceFailure {
                source: source_id.to_string(),
                message,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use linkscout_core::{DiscoveryQuery, PlatformType};

    struct Fixed {
        id: &'static str,
        domains: Vec<&'static str>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn source_id(&self) -> &'static str {
            self.id
        }

        async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
            let candidates = self
                .domains
                .iter()
                .filter_map(|d| PlatformTarget::placeholder(d, PlatformType::Blog, self.id).ok())
                .collect();
            Ok(SourceYield {
                candidates,
                queries_used: vec![format!("{} query", self.id)],
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl SourceAdapter for Failing {
        fn source_id(&self) -> &'static str {
            "failing"
        }

        async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
            Err(AdapterError::Message("upstream 503".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl SourceAdapter for Panicking {
        fn source_id(&self) -> &'static str {
            "panicking"
        }

        async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
            panic!("adapter bug");
        }
    }

    struct Hanging;

    #[async_trait]
    impl SourceAdapter for Hanging {
        fn source_id(&self) -> &'static str {
            "hanging"
        }

        async fn discover(&self, _ctx: &AdapterContext) -> Result<SourceYield, AdapterError> {
            std::future::pending().await
        }
    }

    fn ctx() -> Arc<AdapterContext> {
        Arc::new(AdapterContext::new(DiscoveryQuery::new(["seo"])))
    }

    #[tokio::test]
    async fn merges_in_registration_order() {
        let agg = Aggregator::new(vec![
            Arc::new(Fixed { id: "b", domains: vec!["two.com", "three.com"] }),
            Arc::new(Fixed { id: "a", domains: vec!["one.com"] }),
        ]);
        let out = agg.run(ctx()).await;
        let domains: Vec<_> = out.candidates.iter().map(|c| c.domain.as_str()).collect();
        assert_eq!(domains, vec!["two.com", "three.com", "one.com"]);
        assert_eq!(out.sources, vec!["b", "a"]);
        assert_eq!(out.search_queries, vec!["b query", "a query"]);
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn errors_and_panics_are_isolated() {
        let agg = Aggregator::new(vec![
            Arc::new(Failing),
            Arc::new(Fixed { id: "ok", domains: vec!["one.com"] }),
            Arc::new(Panicking),
        ]);
        let out = agg.run(ctx()).await;
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.sources, vec!["ok"]);
        assert_eq!(out.failures.len(), 2);
        assert_eq!(out.failures[0].source, "failing");
        assert_eq!(out.failures[0].message, "upstream 503");
        assert_eq!(out.failures[1].message, "adapter panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_slow_adapters() {
        let agg = Aggregator::new(vec![
            Arc::new(Hanging),
            Arc::new(Fixed { id: "ok", domains: vec!["one.com"] }),
        ])
        .with_deadline(Some(Duration::from_secs(5)));
        let out = agg.run(ctx()).await;
        assert_eq!(out.sources, vec!["ok"]);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].message.contains("5000 ms deadline"));
    }
}
