//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Fetch transports (scraping API or direct HTTP)
//! - Retry, backoff and redirect handling
//! - Adaptive concurrency on rate-limit signals
//! - The persisted URL frontier
//! - HTML link extraction and overall crawl coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;
mod retry;

#[cfg(test)]
mod test_support;

pub use coordinator::Crawler;
pub use fetcher::{
    build_fetcher, build_http_client, DirectFetcher, FetchResponse, Fetcher, ScrapeApiFetcher, TransportError,
};
pub use frontier::Frontier;
pub use parser::extract_links;
pub use rate_limiter::{ConcurrencyController, ControllerState};
pub use retry::{FailureKind, FetchFailure, FetchOutcome, FetchedPage, RetryPolicy};

use crate::config::Config;
use crate::output::CrawlStatistics;
use crate::CrawlError;

/// Runs a complete crawl of `start_url`
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the configured fetch transport
/// 2. Restore or create the frontier in the output directory
/// 3. Fetch pages in batches, following same-domain links
/// 4. Return the final counts
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `start_url` - Absolute URL the crawl starts from
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Crawl finished or was drained
/// * `Err(CrawlError)` - Crawl could not start or state could not be persisted
pub async fn crawl(config: Config, start_url: &str) -> Result<CrawlStatistics, CrawlError> {
    let fetcher = build_fetcher(&config.fetcher, config.retry.max_redirect_hops)?;
    let mut crawler = Crawler::new(config, start_url, fetcher)?;
    crawler.run().await
}
