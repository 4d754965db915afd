//! Best-effort per-item writes into a platform sink.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use linkscout_core::{IngestionReport, PlatformTarget};
use linkscout_storage::PlatformSink;
use tracing::{info, warn};

pub const DEFAULT_INGEST_CONCURRENCY: usize = 4;

/// Upserts each platform on its own. Failures are counted and described as
/// `"<domain>: <message>"` in input order; none of them stops the batch.
pub async fn ingest(
    sink: &dyn PlatformSink,
    platforms: &[PlatformTarget],
    concurrency: usize,
) -> IngestionReport {
    let outcomes: Vec<_> = stream::iter(platforms)
        .map(|platform| async move { (platform, sink.upsert(platform).await) })
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .boxed()
        .await;

    let mut report = IngestionReport::default();
    for (platform, outcome) in outcomes {
        match outcome {
            Ok(()) => report.added += 1,
            Err(err) => {
                warn!(sink = sink.name(), domain = %platform.domain, %err, "ingestion failed");
                report.failed += 1;
                report.errors.push(format!("{}: {}", platform.domain, err));
            }
        }
    }
    info!(
        sink = sink.name(),
        added = report.added,
        failed = report.failed,
        "ingestion finished"
    );
    report
}
