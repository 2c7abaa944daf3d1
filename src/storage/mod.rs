//! Storage module for persisting crawl state
//!
//! This module handles:
//! - The serializable crawl state snapshot
//! - Whole-snapshot persistence behind the `StateStore` trait
//! - Rebuilding snapshots from JSON Lines output logs

mod json;
mod memory;
mod rebuild;
mod snapshot;
mod traits;

pub use json::JsonStateStore;
pub use memory::MemoryStateStore;
pub use rebuild::rebuild_state_files;
pub use snapshot::CrawlSnapshot;
pub use traits::{StateStore, StorageError, StorageResult};

use std::path::{Path, PathBuf};

/// Makes a domain safe to embed in a file name
///
/// Ports are part of the crawl domain, and `:` is not portable in file names.
pub fn file_stem_for_domain(domain: &str) -> String {
    domain
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Returns the snapshot path for a crawl domain inside the output directory
///
/// # Example
///
/// ```
/// use scrapfly_crawl::storage::state_file_path;
/// use std::path::Path;
///
/// let path = state_file_path(Path::new("output"), "example.com");
/// assert_eq!(path, Path::new("output/example.com.state.json"));
/// ```
pub fn state_file_path(output_dir: &Path, domain: &str) -> PathBuf {
    output_dir.join(format!("{}.state.json", file_stem_for_domain(domain)))
}
