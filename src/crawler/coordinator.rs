//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the batch loop that drives a crawl:
//! - Seeding the frontier with the start URL
//! - Dispatching batches of concurrent fetches sized by the controller
//! - Folding outcomes back into the frontier and the output log
//! - Extracting and enqueueing same-domain links
//! - Pacing batches and stopping cleanly on interrupt

use crate::config::Config;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::frontier::Frontier;
use crate::crawler::parser::extract_links;
use crate::crawler::rate_limiter::ConcurrencyController;
use crate::crawler::retry::{FailureKind, FetchFailure, FetchOutcome, FetchedPage, RetryPolicy};
use crate::output::{output_file_path, CrawlStatistics, JsonlWriter, OutputRecord};
use crate::state::LinkStatus;
use crate::storage::{state_file_path, JsonStateStore};
use crate::url::{extract_domain, filter_links, normalize_absolute};
use crate::{CrawlError, Result, UrlError};
use futures::future::join_all;
use rand::Rng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Breadth-first crawler for a single domain
pub struct Crawler {
    config: Arc<Config>,
    frontier: Frontier,
    controller: Arc<ConcurrencyController>,
    policy: Arc<RetryPolicy>,
    fetcher: Arc<dyn Fetcher>,
    output: Option<JsonlWriter>,
    shutdown: Arc<AtomicBool>,
}

impl Crawler {
    /// Creates a crawler persisting into the configured output directory
    ///
    /// The snapshot lives at `{output_dir}/{domain}.state.json`. With
    /// `resume` set it is restored; otherwise a fresh crawl overwrites it.
    /// Pages are appended to a new timestamped JSON Lines log.
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `start_url` - Absolute start URL
    /// * `fetcher` - Transport used for every request
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to run
    /// * `Err(CrawlError)` - Invalid start URL, unreadable snapshot or unwritable output
    pub fn new(config: Config, start_url: &str, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let start = normalize_absolute(start_url)?;
        let domain = extract_domain(&start).ok_or(UrlError::MissingDomain)?;

        let output_dir = Path::new(&config.output.output_dir);
        std::fs::create_dir_all(output_dir)?;

        let store = JsonStateStore::new(state_file_path(output_dir, &domain));
        let params = config.fetcher.scrape_params();
        let persist_every_mutation = config.output.persist_every_mutation;

        let frontier = if config.output.resume {
            Frontier::restore(
                start.as_str(),
                config.exclude.clone(),
                params,
                Box::new(store),
                persist_every_mutation,
            )?
        } else {
            if store.exists() {
                tracing::warn!(
                    "Overwriting state file {} (pass --resume to continue that crawl)",
                    store.path().display()
                );
            }
            Frontier::new(start.as_str(), config.exclude.clone(), params)?
                .with_store(Box::new(store), persist_every_mutation)
        };

        let output = JsonlWriter::open(output_file_path(output_dir, &domain))?;
        tracing::info!("Writing pages to {}", output.path().display());

        Ok(Self::with_frontier(config, frontier, fetcher, Some(output)))
    }

    /// Creates a crawler around an existing frontier
    pub fn with_frontier(
        config: Config,
        frontier: Frontier,
        fetcher: Arc<dyn Fetcher>,
        output: Option<JsonlWriter>,
    ) -> Self {
        let controller = Arc::new(ConcurrencyController::new(&config.crawler));
        let policy = Arc::new(RetryPolicy::new(&config.retry));

        Self {
            config: Arc::new(config),
            frontier,
            controller,
            policy,
            fetcher,
            output,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the crawl after the in-flight batch
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_ref().map(JsonlWriter::path)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs the crawl until no pending URL is left or a shutdown is requested
    ///
    /// # Crawl Flow
    ///
    /// 1. Register the start URL and fetch it unless a resumed snapshot
    ///    already completed it
    /// 2. Take up to `concurrency` pending URLs in discovery order
    /// 3. Fetch them concurrently and wait for the whole batch
    /// 4. Record every outcome, log pages, enqueue discovered links
    /// 5. Pause for a random politeness delay, then repeat from 2
    pub async fn run(&mut self) -> Result<CrawlStatistics> {
        let started = Instant::now();
        let start_key = self.frontier.base_url().to_string();
        tracing::info!("Starting crawl of {} (domain {})", start_key, self.frontier.domain());

        self.frontier.discover(&start_key)?;
        match self.frontier.status_of(&start_key) {
            Some(LinkStatus::Completed) => {
                tracing::info!(
                    "Start URL already crawled, resuming with {} pending URLs",
                    self.frontier.count(LinkStatus::Pending)
                );
            }
            Some(_) => self.process_batch(vec![start_key]).await?,
            None => tracing::warn!("Start URL {} matches an exclusion pattern", start_key),
        }
        self.frontier.flush()?;

        let mut batch_number = 0;
        while !self.is_shutting_down() {
            let concurrency = self.controller.concurrency().await;
            let batch = self.frontier.pending_batch(concurrency);
            if batch.is_empty() {
                tracing::info!("No pending URLs left");
                break;
            }

            batch_number += 1;
            tracing::info!(
                "Batch {}: fetching {} URLs (concurrency {}, {} pending, {} completed)",
                batch_number,
                batch.len(),
                concurrency,
                self.frontier.count(LinkStatus::Pending),
                self.frontier.count(LinkStatus::Completed)
            );

            self.process_batch(batch).await?;
            self.frontier.flush()?;

            if !self.is_shutting_down() && self.frontier.has_pending() {
                self.politeness_pause().await;
            }
        }
        self.frontier.flush()?;

        let stats = self.statistics();
        if stats.interrupted {
            tracing::warn!("Crawl interrupted with {} URLs pending", stats.pending);
        }
        tracing::info!(
            "Crawl finished in {:.1}s: {} completed, {} pending, {} failed, {} excluded",
            started.elapsed().as_secs_f64(),
            stats.completed,
            stats.pending,
            stats.failed,
            stats.excluded
        );

        Ok(stats)
    }

    /// Fetches one batch concurrently and folds every outcome into the frontier
    ///
    /// A fetch task that panics is recorded as a failure of its URL; the rest
    /// of the batch is unaffected.
    async fn process_batch(&mut self, keys: Vec<String>) -> Result<()> {
        let mut tasks = Vec::with_capacity(keys.len());

        for key in &keys {
            self.frontier.mark_in_progress(key)?;

            let fetcher = Arc::clone(&self.fetcher);
            let policy = Arc::clone(&self.policy);
            let controller = Arc::clone(&self.controller);
            let params = self.frontier.params_for(key);
            let url = key.clone();

            tasks.push(tokio::spawn(async move {
                let result = policy
                    .fetch_with_retry(fetcher.as_ref(), &controller, &url, &params)
                    .await;
                FetchOutcome::classify(result)
            }));
        }

        let results = join_all(tasks).await;
        let total = keys.len();
        let mut failures = 0;

        for (key, joined) in keys.into_iter().zip(results) {
            let outcome = joined.unwrap_or_else(|e| {
                FetchOutcome::Failure(FetchFailure::new(
                    FailureKind::Transport,
                    format!("fetch task failed: {}", e),
                ))
            });

            if matches!(outcome, FetchOutcome::Failure(_)) {
                failures += 1;
            }
            self.fold_outcome(&key, outcome)?;
        }

        if failures > 0 {
            tracing::warn!("{} of {} URLs in batch failed", failures, total);
        }

        Ok(())
    }

    fn fold_outcome(&mut self, key: &str, outcome: FetchOutcome) -> Result<()> {
        match outcome {
            FetchOutcome::Success(page) => {
                self.frontier.record_success(key, &page)?;
                tracing::debug!("Fetched {} ({})", key, page.status_code);

                if page.is_binary() {
                    tracing::debug!("Binary content at {}, body not kept", key);
                    return Ok(());
                }

                self.write_output(key, &page)?;
                self.enqueue_links(key, &page)?;
            }
            FetchOutcome::Failure(failure) => {
                tracing::warn!("Failed {} [{}]: {}", key, failure.kind, failure);
                self.frontier.record_failure(key, &failure)?;
            }
        }
        Ok(())
    }

    fn write_output(&mut self, key: &str, page: &FetchedPage) -> Result<()> {
        let Some(writer) = self.output.as_mut() else {
            return Ok(());
        };
        let Some(record) = self.frontier.record(key) else {
            return Ok(());
        };

        writer.append(&OutputRecord::from_link_record(record, page.body.clone()))?;
        Ok(())
    }

    /// Discovers the same-domain links of a page
    ///
    /// Links are resolved against the page's final URL. Pages that ended up
    /// on another domain contribute no links.
    fn enqueue_links(&mut self, key: &str, page: &FetchedPage) -> Result<()> {
        let Ok(base) = Url::parse(&page.final_url) else {
            return Ok(());
        };
        if extract_domain(&base).as_deref() != Some(self.frontier.domain()) {
            tracing::debug!("{} redirected off the crawl domain, links not followed", key);
            return Ok(());
        }

        let hrefs = match extract_links(&page.body) {
            Ok(hrefs) => hrefs,
            Err(message) => {
                let error = CrawlError::HtmlParse {
                    url: key.to_string(),
                    message,
                };
                tracing::warn!("{}", error);
                return Ok(());
            }
        };

        // Exclusion is applied (and counted) by the frontier
        let mut links: Vec<String> = filter_links(&base, hrefs.iter().map(String::as_str), &[])
            .into_iter()
            .collect();
        links.sort();

        let mut added = 0;
        for link in &links {
            if self.frontier.discover(link)? {
                added += 1;
            }
        }

        tracing::debug!("{}: {} same-domain links, {} new", key, links.len(), added);
        Ok(())
    }

    async fn politeness_pause(&self) {
        let min = self.config.crawler.politeness_min_ms;
        let max = self.config.crawler.politeness_max_ms;
        let millis = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        if millis > 0 {
            tracing::debug!("Pausing {}ms before the next batch", millis);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// Counts of the frontier as it stands
    pub fn statistics(&self) -> CrawlStatistics {
        let pending = self.frontier.count(LinkStatus::Pending);
        CrawlStatistics {
            domain: self.frontier.domain().to_string(),
            completed: self.frontier.count(LinkStatus::Completed),
            pending,
            in_progress: self.frontier.count(LinkStatus::InProgress),
            failed: self.frontier.count(LinkStatus::Failed),
            excluded: self.frontier.exclusion_count(),
            interrupted: self.is_shutting_down() && pending > 0,
        }
    }
}
