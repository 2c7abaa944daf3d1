//! Configuration module
//!
//! This module handles loading, layering and validating the crawler
//! configuration: built-in defaults, an optional TOML file, then flag and
//! environment overrides.
//!
//! # Example
//!
//! ```no_run
//! use scrapfly_crawl::config::{build_config, ConfigOverrides};
//! use std::path::Path;
//!
//! let (config, _hash) = build_config(Some(Path::new("crawl.toml")), &ConfigOverrides::default()).unwrap();
//! println!("Max retries: {}", config.retry.max_retries);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, FetcherBackend, FetcherConfig, OutputConfig, RetryConfig};

// Re-export parser functions
pub use parser::{apply_overrides, build_config, compute_config_hash, load_config, ConfigOverrides};
pub use validation::validate;
