use crate::state::{LinkRecord, LinkStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable projection of the whole frontier
///
/// Maps are ordered so successive snapshots of the same state serialize
/// identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    /// Start URL of the crawl
    pub base_url: String,

    /// Crawl domain
    pub domain: String,

    /// Exclusion patterns in force when the snapshot was written
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Number of discovery attempts rejected by exclusion patterns
    #[serde(default)]
    pub excluded_count: u64,

    /// Metadata per frontier key
    pub links: BTreeMap<String, LinkRecord>,

    /// Status per frontier key
    pub status: BTreeMap<String, LinkStatus>,

    /// First discovery time per frontier key
    pub discovered_at: BTreeMap<String, DateTime<Utc>>,
}

impl CrawlSnapshot {
    /// Creates an empty snapshot for a crawl
    pub fn new(base_url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            domain: domain.into(),
            exclude_patterns: Vec::new(),
            excluded_count: 0,
            links: BTreeMap::new(),
            status: BTreeMap::new(),
            discovered_at: BTreeMap::new(),
        }
    }

    /// Counts keys with the given status
    pub fn count(&self, status: LinkStatus) -> usize {
        self.status.values().filter(|s| **s == status).count()
    }
}
