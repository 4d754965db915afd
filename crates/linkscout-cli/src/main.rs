use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linkscout_core::{DiscoveryQuery, PlatformType};
use linkscout_storage::PgPlatformSink;
use linkscout_sync::{run_discovery_once_from_env, DiscoveryConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "linkscout-cli")]
#[command(about = "Discover, validate and store link-placement venues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one discovery pass and write reports.
    Discover(DiscoverArgs),
    /// Start the JSON API (and the revalidation scheduler when enabled).
    Serve,
    /// Apply database migrations to DATABASE_URL.
    Migrate,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    /// Keyword to search for; repeat for several.
    #[arg(long = "keyword", short = 'k', required = true)]
    keywords: Vec<String>,
    /// Restrict to a category (web2, directory, bookmark, profile, forum, blog, social, qa, wiki, other).
    #[arg(long = "platform-type", short = 't')]
    platform_types: Vec<PlatformType>,
    #[arg(long = "country")]
    countries: Vec<String>,
    #[arg(long = "language")]
    languages: Vec<String>,
    #[arg(long)]
    min_da: Option<u8>,
    #[arg(long)]
    max_da: Option<u8>,
    #[arg(long)]
    requires_auth: Option<bool>,
    #[arg(long)]
    allows_backlinks: Option<bool>,
    #[arg(long)]
    limit: Option<usize>,
    /// Probe every discovered venue and keep only live ones.
    #[arg(long)]
    validate: bool,
    /// Write the resulting venues to the configured sink.
    #[arg(long)]
    ingest: bool,
}

impl DiscoverArgs {
    fn query(&self) -> DiscoveryQuery {
        let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        DiscoveryQuery {
            keywords: self.keywords.clone(),
            countries: non_empty(&self.countries),
            languages: non_empty(&self.languages),
            min_da: self.min_da,
            max_da: self.max_da,
            platform_types: (!self.platform_types.is_empty()).then(|| self.platform_types.clone()),
            requires_auth: self.requires_auth,
            allows_backlinks: self.allows_backlinks,
            limit: self.limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover(args) => {
            let outcome = run_discovery_once_from_env(&args.query(), args.validate, args.ingest).await?;
            println!(
                "discovery complete: run_id={} found={} queries={} sources={} failed_sources={} reports={}",
                outcome.run_id,
                outcome.result.total_found,
                outcome.result.search_queries.len(),
                outcome.result.sources.join(","),
                outcome.result.failures.len(),
                outcome.reports.reports_dir.display()
            );
            if let Some(validation) = &outcome.validation {
                println!(
                    "validation: live={} excluded={}",
                    validation.validated.len(),
                    validation.excluded.len()
                );
            }
            if let Some(ingestion) = &outcome.ingestion {
                println!("ingestion: added={} failed={}", ingestion.added, ingestion.failed);
                for err in &ingestion.errors {
                    eprintln!("  {err}");
                }
            }
        }
        Commands::Serve => linkscout_web::serve_from_env().await?,
        Commands::Migrate => {
            let config = DiscoveryConfig::from_env();
            let url = config
                .database_url
                .context("DATABASE_URL must be set to run migrations")?;
            PgPlatformSink::connect(&url).await?.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_flags_build_a_query() {
        let cli = Cli::try_parse_from([
            "linkscout-cli",
            "discover",
            "-k",
            "seo",
            "--keyword",
            "marketing",
            "--platform-type",
            "directory",
            "--min-da",
            "40",
            "--limit",
            "50",
            "--validate",
        ])
        .unwrap();
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        let query = args.query();
        assert_eq!(query.keywords, vec!["seo", "marketing"]);
        assert_eq!(query.platform_types, Some(vec![PlatformType::Directory]));
        assert_eq!(query.min_da, Some(40));
        assert_eq!(query.countries, None);
        assert_eq!(query.limit, Some(50));
        assert!(args.validate);
        assert!(!args.ingest);
    }

    #[test]
    fn discover_requires_a_keyword() {
        assert!(Cli::try_parse_from(["linkscout-cli", "discover"]).is_err());
    }
}
