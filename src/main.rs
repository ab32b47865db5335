//! # bur_harvest
//!
//! Harvests the laws published on Italian regional portals (BUR, *Bollettino
//! Ufficiale Regionale*): walks each portal's listing, extracts title,
//! number and date of every act, downloads the PDFs and writes one CSV table
//! and one JSON report per region.
//!
//! ## Usage
//!
//! ```sh
//! bur_harvest                       # every bundled region
//! bur_harvest -r Lazio -j 8         # one region, 8 parallel downloads
//! bur_harvest --list                # show configured regions
//! ```
//!
//! ## Architecture
//!
//! One engine, driven by per-region configuration (`regions.yaml`):
//! 1. **Fetching**: listing pages over HTTP or a headless browser, with retries
//! 2. **Extracting**: one record per listing entry, blank-and-flag for gaps
//! 3. **Downloading**: bounded, ordered worker pool writing `pdfs/`
//! 4. **Exporting**: CSV table and JSON report per region

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dates;
mod download;
mod error;
mod extract;
mod fetch;
mod models;
mod outputs;
mod pipeline;
mod utils;

use cli::Cli;
use config::{FetchMode, RegionConfig, load_regions, select_regions};
use error::ScrapeError;
use fetch::http::HttpFetcher;
use fetch::retry::{RetryPolicy, Retrying};
use models::RunReport;
use pipeline::{RunOptions, run_region};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("bur_harvest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let regions = load_regions(args.config.as_deref()).await?;

    if args.list {
        for region in &regions {
            println!(
                "{:<22} {:<22} {:<8} {}",
                region.name,
                region.slug(),
                region.fetch.as_str(),
                region.listing.url
            );
        }
        return Ok(());
    }

    let selected = select_regions(&regions, &args.regions)?;
    let opts = RunOptions {
        output_dir: args.output_dir.clone(),
        concurrency: usize::from(args.concurrency),
        skip_existing: args.skip_existing,
        no_download: args.no_download,
        max_pages: args.max_pages,
    };
    let policy = RetryPolicy::new(
        usize::from(args.max_attempts),
        Duration::from_millis(args.retry_delay_ms),
    );
    let timeout = Duration::from_secs(args.timeout_secs);

    info!(
        regions = selected.len(),
        output_dir = %opts.output_dir.display(),
        concurrency = opts.concurrency,
        max_attempts = policy.max_attempts,
        "Harvest plan ready"
    );

    // ---- Regions run one after another; one failure does not stop the rest ----
    let mut finished: Vec<RunReport> = Vec::new();
    let mut failed: Vec<&str> = Vec::new();
    let mut skipped: Vec<&str> = Vec::new();

    for cfg in selected {
        match harvest(cfg, &opts, policy, timeout).await {
            Ok(report) => finished.push(report),
            Err(ScrapeError::Unsupported(reason)) => {
                warn!(region = %cfg.name, %reason, "Region skipped");
                skipped.push(&cfg.name);
            }
            Err(e) => {
                error!(region = %cfg.name, error = %e, "Region failed");
                failed.push(&cfg.name);
            }
        }
    }

    let records: usize = finished.iter().map(|r| r.records).sum();
    let downloaded: usize = finished.iter().map(|r| r.downloaded).sum();
    let download_failures: usize = finished.iter().map(|r| r.failed).sum();
    let elapsed = start_time.elapsed();
    info!(
        regions_ok = finished.len(),
        regions_failed = failed.len(),
        regions_skipped = skipped.len(),
        records,
        downloaded,
        download_failures,
        secs = elapsed.as_secs(),
        "Execution complete"
    );

    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} region(s) failed: {}", failed.len(), failed.join(", ")).into())
    }
}

/// Build the fetcher stack a region asks for and run it.
async fn harvest(
    cfg: &RegionConfig,
    opts: &RunOptions,
    policy: RetryPolicy,
    timeout: Duration,
) -> Result<RunReport, ScrapeError> {
    let http = HttpFetcher::new(timeout)?;
    match cfg.fetch {
        FetchMode::Http => run_region(cfg, &Retrying::new(http, policy), opts).await,
        FetchMode::Browser => harvest_in_browser(cfg, http, opts, policy, timeout).await,
    }
}

#[cfg(feature = "browser")]
async fn harvest_in_browser(
    cfg: &RegionConfig,
    http: HttpFetcher,
    opts: &RunOptions,
    policy: RetryPolicy,
    timeout: Duration,
) -> Result<RunReport, ScrapeError> {
    let browser = fetch::browser::BrowserFetcher::launch(http, timeout).await?;
    let fetcher = Retrying::new(browser, policy);
    let result = run_region(cfg, &fetcher, opts).await;
    fetcher.into_inner().close().await;
    result
}

#[cfg(not(feature = "browser"))]
async fn harvest_in_browser(
    cfg: &RegionConfig,
    _http: HttpFetcher,
    _opts: &RunOptions,
    _policy: RetryPolicy,
    _timeout: Duration,
) -> Result<RunReport, ScrapeError> {
    Err(ScrapeError::Unsupported(format!(
        "{} needs a headless browser; rebuild with `--features browser`",
        cfg.name
    )))
}
