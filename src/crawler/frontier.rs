//! URL frontier: every known URL of the crawl with its status
//!
//! The frontier owns the link table (records, statuses, discovery times) and
//! the exclusion counter. Only normalized keys are stored. When a state store
//! is attached, the whole table is written after each mutation (or, with
//! `persist_every_mutation` off, whenever [`Frontier::flush`] is called).
//!
//! The frontier is not synchronized; the orchestrator is its only writer.

use crate::crawler::retry::{FetchFailure, FetchedPage};
use crate::state::{LinkRecord, LinkStatus, ScrapeParams};
use crate::storage::{CrawlSnapshot, StateStore, StorageError};
use crate::url::{extract_domain, normalize_absolute, normalize_url, should_exclude};
use crate::{Result, UrlError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use url::Url;

/// The set of known URLs and their crawl status
pub struct Frontier {
    base_url: Url,
    domain: String,
    exclude_patterns: Vec<String>,
    excluded_count: u64,
    links: HashMap<String, LinkRecord>,
    status: HashMap<String, LinkStatus>,
    discovered_at: HashMap<String, DateTime<Utc>>,
    /// Keys in discovery order
    order: Vec<String>,
    default_params: ScrapeParams,
    store: Option<Box<dyn StateStore>>,
    persist_every_mutation: bool,
    dirty: bool,
}

impl Frontier {
    /// Creates an empty, unpersisted frontier for the crawl of `start_url`
    ///
    /// # Arguments
    ///
    /// * `start_url` - Absolute start URL; its domain is the crawl domain
    /// * `exclude_patterns` - Path substrings that are never crawled
    /// * `default_params` - Parameters given to newly discovered URLs
    pub fn new(start_url: &str, exclude_patterns: Vec<String>, default_params: ScrapeParams) -> Result<Self> {
        let base_url = normalize_absolute(start_url)?;
        let domain = extract_domain(&base_url).ok_or(UrlError::MissingDomain)?;

        Ok(Self {
            base_url,
            domain,
            exclude_patterns: clean_patterns(exclude_patterns),
            excluded_count: 0,
            links: HashMap::new(),
            status: HashMap::new(),
            discovered_at: HashMap::new(),
            order: Vec::new(),
            default_params,
            store: None,
            persist_every_mutation: true,
            dirty: false,
        })
    }

    /// Attaches a state store
    pub fn with_store(mut self, store: Box<dyn StateStore>, persist_every_mutation: bool) -> Self {
        self.store = Some(store);
        self.persist_every_mutation = persist_every_mutation;
        self
    }

    /// Rebuilds a frontier from a snapshot
    ///
    /// Non-empty `exclude_patterns` replace the snapshot's patterns; empty
    /// ones keep them. Persisted keys matching the patterns in force are
    /// purged and counted as excluded. Keys left in progress by an
    /// interrupted run are pending again.
    pub fn from_snapshot(
        start_url: &str,
        snapshot: CrawlSnapshot,
        exclude_patterns: Vec<String>,
        default_params: ScrapeParams,
    ) -> Result<Self> {
        let mut frontier = Self::new(start_url, exclude_patterns, default_params)?;

        if snapshot.domain != frontier.domain {
            return Err(StorageError::InvalidSnapshot(format!(
                "snapshot is for {} but the crawl domain is {}",
                snapshot.domain, frontier.domain
            ))
            .into());
        }

        if frontier.exclude_patterns.is_empty() {
            frontier.exclude_patterns = clean_patterns(snapshot.exclude_patterns);
        }
        frontier.excluded_count = snapshot.excluded_count;

        let keys: BTreeSet<String> = snapshot
            .links
            .keys()
            .chain(snapshot.status.keys())
            .cloned()
            .collect();

        let mut requeued = 0;
        for key in keys {
            let mut status = snapshot.status.get(&key).copied().unwrap_or(LinkStatus::Pending);
            if status == LinkStatus::InProgress {
                status = LinkStatus::Pending;
                requeued += 1;
            }

            let record = snapshot
                .links
                .get(&key)
                .cloned()
                .unwrap_or_else(|| LinkRecord::new(key.clone(), frontier.default_params.clone()));
            let discovered = snapshot
                .discovered_at
                .get(&key)
                .copied()
                .or(record.crawled_at)
                .unwrap_or_else(Utc::now);

            frontier.links.insert(key.clone(), record);
            frontier.status.insert(key.clone(), status);
            frontier.discovered_at.insert(key.clone(), discovered);
            frontier.order.push(key);
        }

        let discovered_at = &frontier.discovered_at;
        frontier
            .order
            .sort_by(|a, b| discovered_at.get(a).cmp(&discovered_at.get(b)).then_with(|| a.cmp(b)));

        if requeued > 0 {
            tracing::info!("Re-queued {} URLs left in progress by the previous run", requeued);
        }

        let purged = frontier.purge_excluded();
        if purged > 0 {
            tracing::info!("Removed {} persisted URLs matching exclusion patterns", purged);
        }

        Ok(frontier)
    }

    /// Restores the frontier from `store`, or starts fresh if it holds nothing
    ///
    /// The restored state is persisted again right away so the stored
    /// snapshot reflects any purge.
    pub fn restore(
        start_url: &str,
        exclude_patterns: Vec<String>,
        default_params: ScrapeParams,
        store: Box<dyn StateStore>,
        persist_every_mutation: bool,
    ) -> Result<Self> {
        let frontier = match store.load()? {
            Some(snapshot) => {
                let frontier = Self::from_snapshot(start_url, snapshot, exclude_patterns, default_params)?;
                tracing::info!(
                    "Restored {} URLs from {} ({} completed, {} pending, {} failed, {} excluded)",
                    frontier.len(),
                    store.describe(),
                    frontier.count(LinkStatus::Completed),
                    frontier.count(LinkStatus::Pending),
                    frontier.count(LinkStatus::Failed),
                    frontier.excluded_count
                );
                frontier
            }
            None => {
                tracing::info!("No snapshot at {}, starting a fresh crawl", store.describe());
                Self::new(start_url, exclude_patterns, default_params)?
            }
        };

        let mut frontier = frontier.with_store(store, persist_every_mutation);
        frontier.persist()?;
        Ok(frontier)
    }

    /// Registers a URL
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL is new and now pending
    /// * `Ok(false)` - Already known, or excluded (which bumps the exclusion counter)
    /// * `Err(CrawlError)` - Not a crawlable URL, or persisting failed
    pub fn discover(&mut self, url: &str) -> Result<bool> {
        let key = self.key_for(url)?;
        self.discover_key(key)
    }

    fn discover_key(&mut self, key: String) -> Result<bool> {
        if self.is_excluded(&key) {
            self.excluded_count += 1;
            tracing::debug!("Excluded {}", key);
            self.mutated()?;
            return Ok(false);
        }

        if self.status.contains_key(&key) {
            return Ok(false);
        }

        self.ensure_record(&key);
        self.mutated()?;
        Ok(true)
    }

    /// Marks a URL as dispatched
    pub fn mark_in_progress(&mut self, url: &str) -> Result<()> {
        self.set_status(url, LinkStatus::InProgress, |_| {})
    }

    /// Records a fetched page and completes its URL
    ///
    /// A same-domain final URL that differs from the key is discovered as a
    /// frontier entry of its own.
    pub fn record_success(&mut self, url: &str, page: &FetchedPage) -> Result<()> {
        let key = self.key_for(url)?;

        self.set_status(&key, LinkStatus::Completed, |record| {
            record.status_code = Some(page.status_code);
            record.content_type = page.content_type().map(str::to_string);
            record.crawled_at = Some(Utc::now());
            record.error = None;
            record.proxy_country = record.scrape_params.country.clone();
            record.render_js = Some(record.scrape_params.render_js);
            record.timing = Some(page.timing);
            record.final_url = Some(page.final_url.clone());
            record.redirect_chain = page.redirect_chain.clone();
            record.is_redirected = page.is_redirected();
        })?;

        if page.final_url == key {
            return Ok(());
        }

        let Ok(final_url) = normalize_absolute(&page.final_url) else {
            return Ok(());
        };
        if final_url.as_str() != key && extract_domain(&final_url).as_deref() == Some(self.domain.as_str()) {
            if self.discover_key(final_url.to_string())? {
                tracing::debug!("Tracking redirect target {} of {}", final_url, key);
            }
        }

        Ok(())
    }

    /// Records a terminal failure
    pub fn record_failure(&mut self, url: &str, failure: &FetchFailure) -> Result<()> {
        self.set_status(url, LinkStatus::Failed, |record| {
            record.error = Some(failure.message.clone());
            record.crawled_at = Some(Utc::now());
            if failure.status_code.is_some() {
                record.status_code = failure.status_code;
            }
        })
    }

    fn set_status<F>(&mut self, url: &str, status: LinkStatus, update: F) -> Result<()>
    where
        F: FnOnce(&mut LinkRecord),
    {
        let key = self.key_for(url)?;

        if self.is_excluded(&key) {
            tracing::debug!("Ignoring {} update for excluded {}", status, key);
            return Ok(());
        }

        update(self.ensure_record(&key));
        self.status.insert(key, status);
        self.mutated()
    }

    /// Returns the record of `key`, creating a pending entry if it is unknown
    fn ensure_record(&mut self, key: &str) -> &mut LinkRecord {
        if !self.status.contains_key(key) {
            self.status.insert(key.to_string(), LinkStatus::Pending);
            self.discovered_at.insert(key.to_string(), Utc::now());
            self.order.push(key.to_string());
        }

        let params = &self.default_params;
        self.links
            .entry(key.to_string())
            .or_insert_with(|| LinkRecord::new(key, params.clone()))
    }

    /// Removes every key matching the exclusion patterns
    fn purge_excluded(&mut self) -> usize {
        let excluded: HashSet<String> = self
            .order
            .iter()
            .filter(|key| should_exclude(key, &self.exclude_patterns))
            .cloned()
            .collect();

        for key in &excluded {
            self.links.remove(key);
            self.status.remove(key);
            self.discovered_at.remove(key);
        }
        self.order.retain(|key| !excluded.contains(key));
        self.excluded_count += excluded.len() as u64;

        excluded.len()
    }

    fn key_for(&self, url: &str) -> Result<String> {
        Ok(normalize_url(&self.base_url, url)?.to_string())
    }

    fn is_excluded(&self, key: &str) -> bool {
        should_exclude(key, &self.exclude_patterns)
    }

    fn keys_with(&self, status: LinkStatus) -> impl Iterator<Item = &String> + '_ {
        self.order
            .iter()
            .filter(move |key| self.status.get(*key) == Some(&status))
    }

    /// Pending keys in discovery order, excluded keys filtered out
    pub fn pending(&self) -> Vec<String> {
        self.pending_batch(usize::MAX)
    }

    /// Up to `limit` pending keys in discovery order
    pub fn pending_batch(&self, limit: usize) -> Vec<String> {
        self.keys_with(LinkStatus::Pending)
            .filter(|key| !self.is_excluded(key))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_batch(1).is_empty()
    }

    pub fn completed(&self) -> Vec<String> {
        self.keys_with(LinkStatus::Completed).cloned().collect()
    }

    pub fn failed(&self) -> Vec<String> {
        self.keys_with(LinkStatus::Failed).cloned().collect()
    }

    pub fn in_progress(&self) -> Vec<String> {
        self.keys_with(LinkStatus::InProgress).cloned().collect()
    }

    pub fn count(&self, status: LinkStatus) -> usize {
        self.status.values().filter(|s| **s == status).count()
    }

    /// Number of discovery attempts rejected by exclusion patterns
    pub fn exclusion_count(&self) -> u64 {
        self.excluded_count
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    /// Status of a URL, normalized first
    pub fn status_of(&self, url: &str) -> Option<LinkStatus> {
        let key = self.key_for(url).ok()?;
        self.status.get(&key).copied()
    }

    pub fn record(&self, url: &str) -> Option<&LinkRecord> {
        let key = self.key_for(url).ok()?;
        self.links.get(&key)
    }

    /// Parameters to fetch `key` with
    pub fn params_for(&self, key: &str) -> ScrapeParams {
        self.links
            .get(key)
            .map(|record| record.scrape_params.clone())
            .unwrap_or_else(|| self.default_params.clone())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    /// Serializable projection of the whole frontier
    pub fn snapshot(&self) -> CrawlSnapshot {
        let mut snapshot = CrawlSnapshot::new(self.base_url.as_str(), self.domain.clone());
        snapshot.exclude_patterns = self.exclude_patterns.clone();
        snapshot.excluded_count = self.excluded_count;
        snapshot.links = self.links.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        snapshot.status = self.status.iter().map(|(k, v)| (k.clone(), *v)).collect();
        snapshot.discovered_at = self.discovered_at.iter().map(|(k, v)| (k.clone(), *v)).collect();
        snapshot
    }

    /// Writes the snapshot if anything changed since the last write
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.persist()?;
        }
        Ok(())
    }

    fn mutated(&mut self) -> Result<()> {
        self.dirty = true;
        if self.persist_every_mutation {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        if self.store.is_none() {
            self.dirty = false;
            return Ok(());
        }

        let snapshot = self.snapshot();
        if let Some(store) = self.store.as_mut() {
            store.save(&snapshot)?;
        }
        self.dirty = false;
        Ok(())
    }
}

fn clean_patterns(patterns: Vec<String>) -> Vec<String> {
    patterns.into_iter().filter(|p| !p.is_empty()).collect()
}
