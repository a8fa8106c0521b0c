use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use demo_scraper::app::ports::HubCatalogPort;
use demo_scraper::config::{Config, DEFAULT_CONFIG_PATH};
use demo_scraper::infra::catalog::{inverted_tags, overlapping_tags, tag_gaps, FileHubCatalog};
use demo_scraper::{logging, metrics, AcquisitionPipeline, RunOutcome};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "demo_scraper")]
#[command(about = "Match demo acquisition: fetch, download, parse and publish hub demos")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition pass over every catalog hub
    Run {
        /// Newest finish date to include (YYYY-MM-DD or RFC 3339). Defaults to now.
        #[arg(long)]
        from: Option<String>,
        /// Oldest finish date to include. Defaults to `from` minus `--days`.
        #[arg(long)]
        until: Option<String>,
        /// Window length used when `--until` is omitted
        #[arg(long, default_value_t = 1)]
        days: i64,
    },
    /// List the hubs in the catalog
    Hubs,
    /// List tags and flag overlapping or uncovered ranges
    Tags,
}

/// Accepts a full timestamp or a bare date. A bare `--from` date covers that
/// whole day; a bare `--until` date starts at midnight.
fn parse_bound(raw: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is neither YYYY-MM-DD nor RFC 3339"))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("invalid date '{raw}'"))
}

async fn run(config: &Config, from: Option<String>, until: Option<String>, days: i64) -> anyhow::Result<()> {
    let from = match from {
        Some(raw) => parse_bound(&raw, true)?,
        None => Utc::now(),
    };
    let until = match until {
        Some(raw) => parse_bound(&raw, false)?,
        None => from - Duration::days(days.max(0)),
    };

    let pipeline = AcquisitionPipeline::from_config(config)?;
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let outcome = pipeline.run_acquisition(from, until).await?;
    if let RunOutcome::AlreadyRunning = outcome {
        warn!("run rejected, another run is in progress");
    }
    println!("{}", outcome.text());
    Ok(())
}

async fn list_hubs(catalog: &FileHubCatalog) -> anyhow::Result<()> {
    let hubs = catalog.hubs().await?;
    println!("{} hubs in {}", hubs.len(), catalog.path().display());
    for hub in hubs {
        println!("  {:<12} {:<24} {:<12} {}", hub.id, hub.display_name, hub.kind, hub.external_guid);
    }
    Ok(())
}

async fn list_tags(catalog: &FileHubCatalog) -> anyhow::Result<()> {
    let tags = catalog.tags().await?;
    println!("{} tags in {}", tags.len(), catalog.path().display());
    for tag in &tags {
        println!("  {:<16} {} .. {}  {}", tag.name, tag.start_date, tag.end_date, tag.game_kind);
    }
    let overlaps = overlapping_tags(&tags);
    if overlaps.is_empty() {
        println!("No overlapping ranges.");
    } else {
        println!("Overlapping ranges (the first tag listed wins):");
        for (a, b) in overlaps {
            println!("  {} / {} ({})", a.name, b.name, a.game_kind);
        }
    }
    for tag in inverted_tags(&tags) {
        println!("Inverted range: {} ends before it starts (matches nothing)", tag.name);
    }
    for (kind, first, last) in tag_gaps(&tags) {
        println!("Gap for {kind}: {first} .. {last} (matches there classify as UNKNOWN)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_logging(&config.paths.log_dir);
    metrics::init_metrics();
    info!(config = %cli.config.display(), "demo_scraper starting");

    let catalog = FileHubCatalog::new(config.paths.catalog.clone());
    let result = match cli.command {
        Commands::Run { from, until, days } => run(&config, from, until, days).await,
        Commands::Hubs => list_hubs(&catalog).await,
        Commands::Tags => list_tags(&catalog).await,
    };
    if let Err(e) = &result {
        error!("command failed: {:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_dates_cover_whole_days() {
        let from = parse_bound("2024-03-02", true).unwrap();
        let until = parse_bound("2024-03-01", false).unwrap();
        assert_eq!(from.to_rfc3339(), "2024-03-02T23:59:59+00:00");
        assert_eq!(until.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(parse_bound("yesterday", false).is_err());
    }
}
