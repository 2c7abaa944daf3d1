use crate::state::ScrapeParams;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure
///
/// Built once at startup from defaults, an optional TOML file and
/// environment/flag overrides, then shared read-only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub retry: RetryConfig,
    pub fetcher: FetcherConfig,
    pub output: OutputConfig,

    /// Substrings of URL paths that are never crawled
    pub exclude: Vec<String>,
}

/// Concurrency and pacing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Concurrency of the first batch
    pub initial_concurrency: usize,

    /// Lower bound the controller never goes below
    pub min_concurrency: usize,

    /// Upper bound the controller never exceeds (defaults to the initial value)
    pub max_concurrency: Option<usize>,

    /// Lower bound of the random pause between batches (milliseconds)
    pub politeness_min_ms: u64,

    /// Upper bound of the random pause between batches (milliseconds)
    pub politeness_max_ms: u64,
}

impl CrawlerConfig {
    /// Effective upper concurrency bound
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(self.initial_concurrency)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            initial_concurrency: 1,
            min_concurrency: 1,
            max_concurrency: None,
            politeness_min_ms: 3000,
            politeness_max_ms: 5000,
        }
    }
}

/// Retry and timeout configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Request attempts per URL
    pub max_retries: u32,

    /// Base of the exponential backoff (milliseconds)
    pub base_delay_ms: u64,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Longest redirect chain accepted for one URL
    pub max_redirect_hops: usize,

    /// Ceiling on any `Retry-After` delay honored (milliseconds)
    pub max_retry_after_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5000,
            timeout_ms: 60_000,
            max_redirect_hops: 10,
            max_retry_after_ms: 300_000,
        }
    }
}

/// Which transport performs the fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FetcherBackend {
    /// Remote scraping API (JavaScript rendering, proxies, anti-bot bypass)
    #[default]
    ScrapeApi,

    /// Plain HTTP requests straight to the target
    Direct,
}

/// Fetch transport configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetcherConfig {
    pub backend: FetcherBackend,

    /// Scraping API endpoint
    pub api_endpoint: String,

    /// Scraping API key
    pub api_key: Option<String>,

    /// Render pages with JavaScript by default
    pub render_js: bool,

    /// Enable anti-bot protection bypass
    pub asp: bool,

    /// Keep the backend's debug trace
    pub debug: bool,

    /// Proxy country
    pub proxy_country: Option<String>,

    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl FetcherConfig {
    /// Default parameter bag for newly discovered URLs
    pub fn scrape_params(&self) -> ScrapeParams {
        ScrapeParams {
            render_js: self.render_js,
            asp: self.asp,
            debug: self.debug,
            country: self.proxy_country.clone(),
            method: "GET".to_string(),
            headers: self.headers.clone(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        let params = ScrapeParams::default();
        Self {
            backend: FetcherBackend::default(),
            api_endpoint: "https://api.scrapfly.io/scrape".to_string(),
            api_key: None,
            render_js: params.render_js,
            asp: params.asp,
            debug: params.debug,
            proxy_country: None,
            headers: params.headers,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory for output logs and state snapshots
    pub output_dir: String,

    /// Resume from the domain's state snapshot if one exists
    pub resume: bool,

    /// Persist the snapshot after every frontier mutation instead of once per batch
    pub persist_every_mutation: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            resume: false,
            persist_every_mutation: true,
        }
    }
}
