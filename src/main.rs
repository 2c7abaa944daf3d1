//! Scrapfly-Crawl main entry point
//!
//! This is the command-line interface for the resumable single-domain crawler.

use anyhow::{bail, Context};
use clap::builder::BoolishValueParser;
use clap::Parser;
use scrapfly_crawl::config::{build_config, Config, ConfigOverrides, FetcherBackend};
use scrapfly_crawl::crawler::{build_fetcher, Crawler};
use scrapfly_crawl::output::{print_statistics, CrawlStatistics};
use scrapfly_crawl::storage::{rebuild_state_files, JsonStateStore, StateStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit status of a crawl stopped by Ctrl-C
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Scrapfly-Crawl: a polite, resumable breadth-first crawler
///
/// Crawls every page of one domain through the scraping API (or directly),
/// adapting concurrency to rate limits and persisting its frontier after
/// every change so an interrupted crawl can be resumed with --resume.
#[derive(Parser, Debug)]
#[command(name = "scrapfly-crawl")]
#[command(version)]
#[command(about = "A polite, resumable breadth-first crawler", long_about = None)]
struct Cli {
    /// URL to start crawling from (http:// is assumed without a scheme)
    #[arg(value_name = "URL", required_unless_present_any = ["stats", "rebuild_state"])]
    url: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume from the saved state of a previous crawl of the same domain
    #[arg(long)]
    resume: bool,

    /// Render pages with JavaScript
    #[arg(
        long,
        env = "RENDER_JS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    render_js: Option<bool>,

    /// Number of URLs fetched concurrently at the start
    #[arg(long = "concurrent", env = "INITIAL_CONCURRENCY")]
    initial_concurrency: Option<usize>,

    /// Lowest concurrency rate limiting may push the crawl down to
    #[arg(long, env = "MIN_CONCURRENCY")]
    min_concurrency: Option<usize>,

    /// Highest concurrency the crawl may grow to
    #[arg(long, env = "MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Request attempts per URL
    #[arg(long, env = "MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Base backoff delay in seconds
    #[arg(long, env = "BASE_DELAY", value_name = "SECS")]
    base_delay: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT", value_name = "SECS")]
    timeout: Option<f64>,

    /// Directory for output logs and state files
    #[arg(short, long, env = "OUTPUT_DIR", value_name = "DIR")]
    output_dir: Option<String>,

    /// Skip URLs containing this substring (repeatable or comma separated)
    #[arg(short, long = "exclude", env = "EXCLUDE_PATTERNS", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Scraping API key
    #[arg(long, env = "SCRAPFLY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Fetch transport
    #[arg(long, value_enum)]
    backend: Option<FetcherBackend>,

    /// Print the statistics of a state file and exit
    #[arg(long, value_name = "STATE_FILE", conflicts_with = "rebuild_state")]
    stats: Option<PathBuf>,

    /// Rebuild state files from the output logs in the output directory and exit
    #[arg(long)]
    rebuild_state: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            initial_concurrency: self.initial_concurrency,
            min_concurrency: self.min_concurrency,
            max_concurrency: self.max_concurrency,
            max_retries: self.max_retries,
            base_delay_secs: self.base_delay,
            timeout_secs: self.timeout,
            render_js: self.render_js,
            backend: self.backend,
            api_key: self.api_key.clone(),
            output_dir: self.output_dir.clone(),
            resume: self.resume,
            exclude: self.exclude.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Some(state_file) = &cli.stats {
        return handle_stats(state_file);
    }

    let (config, config_hash) = build_config(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;
    if let (Some(path), Some(hash)) = (&cli.config, &config_hash) {
        tracing::info!("Configuration loaded from {} (hash: {})", path.display(), hash);
    }

    if cli.rebuild_state {
        return handle_rebuild_state(&config);
    }

    let Some(url) = cli.url.as_deref() else {
        bail!("a start URL is required");
    };

    let stats = handle_crawl(config, &with_scheme(url)).await?;
    print_statistics(&stats);

    if stats.interrupted {
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Without flags, `RUST_LOG` takes precedence over the default filter.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scrapfly_crawl=info,warn")),
            1 => EnvFilter::new("scrapfly_crawl=debug,info"),
            2 => EnvFilter::new("scrapfly_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Prepends `http://` to a URL given without a scheme
fn with_scheme(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") {
        url.to_string()
    } else {
        tracing::info!("No scheme in {}, assuming http://", url);
        format!("http://{}", url)
    }
}

/// Handles the --stats mode: prints the counts of a saved state file
fn handle_stats(state_file: &Path) -> anyhow::Result<()> {
    let store = JsonStateStore::new(state_file);
    let Some(snapshot) = store
        .load()
        .with_context(|| format!("Failed to read state file {}", state_file.display()))?
    else {
        bail!("state file {} does not exist", state_file.display());
    };

    println!("State file: {}", state_file.display());
    println!("Start URL: {}\n", snapshot.base_url);
    print_statistics(&CrawlStatistics::from_snapshot(&snapshot));

    Ok(())
}

/// Handles the --rebuild-state mode: regenerates state files from output logs
fn handle_rebuild_state(config: &Config) -> anyhow::Result<()> {
    let output_dir = Path::new(&config.output.output_dir);
    println!("=== Rebuilding state from {} ===\n", output_dir.display());

    let written = rebuild_state_files(output_dir)
        .with_context(|| format!("Failed to rebuild state in {}", output_dir.display()))?;

    if written.is_empty() {
        println!("No output logs found");
    }
    for path in &written {
        println!("✓ Wrote {}", path.display());
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, url: &str) -> anyhow::Result<CrawlStatistics> {
    if config.output.resume {
        tracing::info!("Resuming crawl of {} if saved state exists", url);
    } else {
        tracing::info!("Starting fresh crawl of {}", url);
    }
    tracing::info!(
        "Concurrency {} (min {}, max {}), {} retries, backend {:?}",
        config.crawler.initial_concurrency,
        config.crawler.min_concurrency,
        config.crawler.max_concurrency(),
        config.retry.max_retries,
        config.fetcher.backend
    );

    let fetcher = build_fetcher(&config.fetcher, config.retry.max_redirect_hops)?;
    let mut crawler = Crawler::new(config, url, fetcher).context("Failed to start crawl")?;
    install_interrupt_handler(crawler.shutdown_handle());

    match crawler.run().await {
        Ok(stats) => {
            tracing::info!("Crawl completed");
            Ok(stats)
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// First Ctrl-C drains the current batch, a second one exits at once
fn install_interrupt_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, stopping after the current batch (Ctrl-C again to quit now)");
        shutdown.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Second interrupt, exiting without waiting for the batch");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}
