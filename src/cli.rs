//! Command-line interface definitions for bur_harvest.
//!
//! Every option has a default, so a bare invocation harvests all configured
//! regions into `./output`. Paths can also come from environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the regional law harvester.
///
/// # Examples
///
/// ```sh
/// # Every bundled region, default settings
/// bur_harvest
///
/// # Two regions, metadata only
/// bur_harvest -r Lazio -r "Emilia-Romagna" --no-download
///
/// # Custom region file, resume into an existing output tree
/// bur_harvest -c ./regions.yaml -o /data/bur --skip-existing -j 8
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Region definitions (YAML); the bundled set is used when omitted
    #[arg(short, long, env = "BUR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Region to harvest, by name or slug; repeatable (default: all)
    #[arg(short, long = "region")]
    pub regions: Vec<String>,

    /// Root directory for CSV tables, reports and PDFs
    #[arg(short, long, env = "BUR_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Parallel downloads per region
    #[arg(short = 'j', long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_attempts: u16,

    /// Base delay before the first retry, doubled on each further retry
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Cap on listing pages per region (overrides the region's own cap)
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Keep PDFs already present on disk instead of downloading them again
    #[arg(long)]
    pub skip_existing: bool,

    /// Collect metadata only; no document downloads
    #[arg(long)]
    pub no_download: bool,

    /// Print the configured regions and exit
    #[arg(long)]
    pub list: bool,
}
