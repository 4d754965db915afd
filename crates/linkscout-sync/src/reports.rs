//! Per-run report files: full JSON result, Markdown summary and a Parquet
//! snapshot of the platforms with a checksummed manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt64Array, UInt8Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use linkscout_core::{
    DiscoveryQuery, DiscoveryResult, DiscoveryStats, IngestionReport, PlatformTarget,
    ValidationReport,
};
use linkscout_storage::sha256_hex;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord<'a> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub query: &'a DiscoveryQuery,
    pub result: &'a DiscoveryResult,
    pub validation: Option<&'a ValidationReport>,
    pub ingestion: Option<&'a IngestionReport>,
    pub stats: DiscoveryStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReportPaths {
    pub reports_dir: PathBuf,
    pub result_json: PathBuf,
    pub summary_md: PathBuf,
    pub parquet_manifest: PathBuf,
}

/// Platforms in the snapshot: the validated set when validation ran,
/// otherwise everything discovered.
fn snapshot_platforms<'a>(record: &'a RunRecord<'a>) -> &'a [PlatformTarget] {
    match record.validation {
        Some(v) => &v.validated,
        None => &record.result.platforms,
    }
}

pub async fn write_run_reports(reports_root: &Path, record: &RunRecord<'_>) -> Result<RunReportPaths> {
    let reports_dir = reports_root.join(record.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let result_json = reports_dir.join("discovery_result.json");
    let bytes = serde_json::to_vec_pretty(record).context("serializing run record")?;
    fs::write(&result_json, bytes)
        .await
        .with_context(|| format!("writing {}", result_json.display()))?;

    let summary_md = reports_dir.join("summary.md");
    fs::write(&summary_md, summary_markdown(record))
        .await
        .context("writing summary.md")?;

    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;
    let platforms_path = snapshot_dir.join("platforms.parquet");
    write_platforms_parquet(&platforms_path, snapshot_platforms(record))?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("platforms", &reports_dir, &platforms_path)?],
    };
    let parquet_manifest = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&parquet_manifest, bytes)
        .await
        .with_context(|| format!("writing {}", parquet_manifest.display()))?;

    Ok(RunReportPaths {
        reports_dir,
        result_json,
        summary_md,
        parquet_manifest,
    })
}

pub fn summary_markdown(record: &RunRecord<'_>) -> String {
    let result = record.result;
    let mut lines = vec![
        "# Venue Discovery Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", record.run_id),
        format!("- Started: {}", record.started_at),
        format!("- Finished: {}", record.finished_at),
        format!("- Keywords: {}", record.query.keywords.join(", ")),
        format!("- Search queries used: {}", result.search_queries.len()),
        format!("- Platforms found: {}", result.total_found),
        format!("- Processing time: {} ms", result.processing_time_ms),
        format!("- Sources: {}", result.sources.join(", ")),
    ];

    if !result.failures.is_empty() {
        lines.push(String::new());
        lines.push("## Failed Sources".to_string());
        for f in &result.failures {
            lines.push(format!("- {}: {}", f.source, f.message));
        }
    }

    if let Some(validation) = record.validation {
        lines.push(String::new());
        lines.push("## Validation".to_string());
        lines.push(format!("- Live: {}", validation.validated.len()));
        lines.push(format!("- Excluded: {}", validation.excluded.len()));
    }

    if let Some(ingestion) = record.ingestion {
        lines.push(String::new());
        lines.push("## Ingestion".to_string());
        lines.push(format!("- Added: {}", ingestion.added));
        lines.push(format!("- Failed: {}", ingestion.failed));
        for e in &ingestion.errors {
            lines.push(format!("  - {e}"));
        }
    }

    lines.push(String::new());
    lines.push("## By Type".to_string());
    for (k, v) in &record.stats.by_type {
        lines.push(format!("- {k}: {v}"));
    }
    lines.push(format!("\nAverage DA: {:.1}", record.stats.average_da));
    lines.push(String::new());
    lines.join("\n")
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_platforms_parquet(path: &Path, platforms: &[PlatformTarget]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("domain", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("platform_type", DataType::Utf8, false),
        ArrowField::new("domain_authority", DataType::UInt8, false),
        ArrowField::new("success_rate", DataType::Float64, false),
        ArrowField::new("avg_response_time_ms", DataType::UInt64, false),
        ArrowField::new("requires_auth", DataType::Boolean, false),
        ArrowField::new("allows_backlinks", DataType::Boolean, false),
        ArrowField::new("difficulty", DataType::Utf8, false),
        ArrowField::new("discovery_source", DataType::Utf8, false),
        ArrowField::new("last_tested", DataType::Utf8, true),
    ]));

    let domains = StringArray::from(platforms.iter().map(|p| Some(p.domain.as_str())).collect::<Vec<_>>());
    let urls = StringArray::from(platforms.iter().map(|p| Some(p.url.as_str())).collect::<Vec<_>>());
    let types = StringArray::from(
        platforms
            .iter()
            .map(|p| Some(p.platform_type.as_str()))
            .collect::<Vec<_>>(),
    );
    let authority = UInt8Array::from(platforms.iter().map(|p| p.domain_authority).collect::<Vec<_>>());
    let success = Float64Array::from(platforms.iter().map(|p| p.success_rate).collect::<Vec<_>>());
    let latency = UInt64Array::from(
        platforms
            .iter()
            .map(|p| p.avg_response_time_ms)
            .collect::<Vec<_>>(),
    );
    let auth = BooleanArray::from(platforms.iter().map(|p| p.requires_auth).collect::<Vec<_>>());
    let backlinks = BooleanArray::from(platforms.iter().map(|p| p.allows_backlinks).collect::<Vec<_>>());
    let difficulty = StringArray::from(
        platforms
            .iter()
            .map(|p| Some(p.difficulty.as_str()))
            .collect::<Vec<_>>(),
    );
    let sources = StringArray::from(
        platforms
            .iter()
            .map(|p| Some(p.discovery_source.as_str()))
            .collect::<Vec<_>>(),
    );
    let tested = StringArray::from(
        platforms
            .iter()
            .map(|p| p.last_tested.map(|t| t.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(domains),
            Arc::new(urls),
            Arc::new(types),
            Arc::new(authority),
            Arc::new(success),
            Arc::new(latency),
            Arc::new(auth),
            Arc::new(backlinks),
            Arc::new(difficulty),
            Arc::new(sources),
            Arc::new(tested),
        ],
    )
    .context("building platforms record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
