//! Output module for crawl results and reports
//!
//! This module handles:
//! - Appending fetched pages to the JSON Lines output log
//! - Recording and printing crawl statistics

mod jsonl;
pub mod stats;

pub use jsonl::{output_file_path, JsonlWriter, OutputMetadata, OutputRecord};
pub use stats::{print_statistics, CrawlStatistics};
