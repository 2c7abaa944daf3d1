use crate::config::types::{Config, FetcherBackend};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Values that take precedence over the configuration file
///
/// Filled from command-line flags and their environment variable fallbacks.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub initial_concurrency: Option<usize>,
    pub min_concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub base_delay_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub render_js: Option<bool>,
    pub backend: Option<FetcherBackend>,
    pub api_key: Option<String>,
    pub output_dir: Option<String>,
    pub resume: bool,
    pub exclude: Vec<String>,
}

/// Loads and parses a configuration file from the given path
///
/// Missing keys take their defaults. The result is not validated yet, since
/// environment and flag overrides may still complete it; see [`build_config`].
///
/// # Returns
///
/// * `Ok(Config)` - Successfully parsed configuration
/// * `Err(ConfigError)` - Failed to read or parse the file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a crawl can be matched with the configuration it ran with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Builds the effective configuration
///
/// Precedence, lowest first: built-in defaults, the optional TOML file,
/// then `overrides`. The result is validated once, after all layers apply.
///
/// # Returns
///
/// The configuration and the hash of the file it was read from, if any
pub fn build_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<(Config, Option<String>), ConfigError> {
    let (mut config, hash) = match path {
        Some(p) => (load_config(p)?, Some(compute_config_hash(p)?)),
        None => (Config::default(), None),
    };

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok((config, hash))
}

/// Applies overrides on top of a configuration
pub fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(n) = overrides.initial_concurrency {
        config.crawler.initial_concurrency = n;
    }
    if let Some(n) = overrides.min_concurrency {
        config.crawler.min_concurrency = n;
    }
    if let Some(n) = overrides.max_concurrency {
        config.crawler.max_concurrency = Some(n);
    }
    if let Some(n) = overrides.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(secs) = overrides.base_delay_secs {
        config.retry.base_delay_ms = secs_to_ms(secs);
    }
    if let Some(secs) = overrides.timeout_secs {
        config.retry.timeout_ms = secs_to_ms(secs);
    }
    if let Some(render_js) = overrides.render_js {
        config.fetcher.render_js = render_js;
    }
    if let Some(backend) = overrides.backend {
        config.fetcher.backend = backend;
    }
    if let Some(key) = overrides.api_key.as_ref().filter(|k| !k.is_empty()) {
        config.fetcher.api_key = Some(key.clone());
    }
    if let Some(dir) = &overrides.output_dir {
        config.output.output_dir = dir.clone();
    }
    if overrides.resume {
        config.output.resume = true;
    }
    for pattern in &overrides.exclude {
        if !pattern.is_empty() && !config.exclude.contains(pattern) {
            config.exclude.push(pattern.clone());
        }
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}
