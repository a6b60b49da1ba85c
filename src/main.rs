// Copyright 2026 edugis-scraper Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::Parser;
use edugis_scraper::driver::chromium::ChromiumDriver;
use edugis_scraper::{EntityRecord, Orchestrator, RecordSink, ScrapeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "edugis-scraper",
    about = "Scrape per-school statistics from the legacy edugis query form",
    version
)]
struct Cli {
    /// Config file (JSON) overriding the built-in region/sub-region defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Top-level region display name (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Sub-region display name (repeatable; overrides config)
    #[arg(long = "sub-region")]
    sub_regions: Vec<String>,

    /// Emit each record as soon as its detail pass finishes, before merging
    #[arg(long)]
    stream: bool,

    /// Enable verbose/debug logging
    #[arg(long, short)]
    verbose: bool,
}

/// Prints one JSON object per line as records are finalized.
struct JsonLinesSink;

impl RecordSink for JsonLinesSink {
    fn emit(&mut self, record: &EntityRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            println!("{line}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<ScrapeConfig>(&raw)
                .with_context(|| format!("malformed config {}", path.display()))?
        }
        None => ScrapeConfig::default(),
    };
    if let Some(region) = cli.region {
        cfg.region = region;
    }
    if !cli.sub_regions.is_empty() {
        cfg.sub_regions = cli.sub_regions;
    }

    let driver = ChromiumDriver::launch().await?;
    let mut orchestrator = Orchestrator::new(driver, cfg);

    let mut sink = JsonLinesSink;
    let records = if cli.stream {
        orchestrator.run(Some(&mut sink)).await?
    } else {
        orchestrator.run(None).await?
    };

    if !cli.stream {
        for record in &records {
            sink.emit(record);
        }
    }

    let stats = orchestrator.stats();
    tracing::info!(
        records = records.len(),
        found = stats.entities_found,
        detailed = stats.details_extracted,
        failed = stats.entities_failed,
        skipped_sub_regions = stats.sub_regions_skipped,
        "scrape finished"
    );
    Ok(())
}
