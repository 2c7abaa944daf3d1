//! Crawl statistics
//!
//! Aggregate counts reported at the end of a run and by the `--stats` mode.

use crate::state::LinkStatus;
use crate::storage::CrawlSnapshot;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStatistics {
    /// Crawl domain
    pub domain: String,

    /// Keys fetched and recorded
    pub completed: usize,

    /// Keys still waiting to be fetched
    pub pending: usize,

    /// Keys dispatched but never folded back (interrupted batch)
    pub in_progress: usize,

    /// Keys that ended in a terminal failure
    pub failed: usize,

    /// Discovery attempts rejected by exclusion patterns
    pub excluded: u64,

    /// Whether the run stopped early on an interrupt
    pub interrupted: bool,
}

impl CrawlStatistics {
    /// Total number of tracked keys
    pub fn total(&self) -> usize {
        self.completed + self.pending + self.in_progress + self.failed
    }

    /// Computes statistics from a persisted snapshot
    pub fn from_snapshot(snapshot: &CrawlSnapshot) -> Self {
        Self {
            domain: snapshot.domain.clone(),
            completed: snapshot.count(LinkStatus::Completed),
            pending: snapshot.count(LinkStatus::Pending),
            in_progress: snapshot.count(LinkStatus::InProgress),
            failed: snapshot.count(LinkStatus::Failed),
            excluded: snapshot.excluded_count,
            interrupted: false,
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics for {} ===\n", stats.domain);

    let total = stats.total();
    for (label, count) in [
        ("Completed", stats.completed),
        ("Pending", stats.pending),
        ("In progress", stats.in_progress),
        ("Failed", stats.failed),
    ] {
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!("  Excluded: {}", stats.excluded);
    println!();

    if stats.interrupted {
        println!("Crawl was interrupted; resume with --resume to continue.");
    }
}
