use crate::config::types::{Config, CrawlerConfig, FetcherBackend, FetcherConfig, OutputConfig, RetryConfig};
use crate::ConfigError;
use url::Url;

/// Hard ceiling for any concurrency bound
const MAX_CONCURRENCY_CEILING: usize = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_output_config(&config.output)?;
    validate_exclude_patterns(&config.exclude)?;
    Ok(())
}

/// Validates concurrency bounds and pacing
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let min = config.min_concurrency;
    let initial = config.initial_concurrency;
    let max = config.max_concurrency();

    if min < 1 {
        return Err(ConfigError::Validation(format!(
            "min_concurrency must be >= 1, got {}",
            min
        )));
    }

    if max > MAX_CONCURRENCY_CEILING {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be <= {}, got {}",
            MAX_CONCURRENCY_CEILING, max
        )));
    }

    if !(min <= initial && initial <= max) {
        return Err(ConfigError::Validation(format!(
            "concurrency bounds must satisfy min <= initial <= max, got {} <= {} <= {}",
            min, initial, max
        )));
    }

    if config.politeness_min_ms > config.politeness_max_ms {
        return Err(ConfigError::Validation(format!(
            "politeness_min_ms ({}) must not exceed politeness_max_ms ({})",
            config.politeness_min_ms, config.politeness_max_ms
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }

    if config.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "timeout_ms must be >= 100ms, got {}ms",
            config.timeout_ms
        )));
    }

    if config.max_retry_after_ms == 0 {
        return Err(ConfigError::Validation(
            "max_retry_after_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates the fetch backend settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.backend != FetcherBackend::ScrapeApi {
        return Ok(());
    }

    if config.api_key.as_deref().map_or(true, str::is_empty) {
        return Err(ConfigError::MissingCredentials(
            "the scrape-api backend needs an API key (SCRAPFLY_API_KEY or --api-key)".to_string(),
        ));
    }

    Url::parse(&config.api_endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_endpoint: {}", e)))?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.output_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates exclusion patterns
fn validate_exclude_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    if patterns.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "exclude patterns cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.fetcher.api_key = Some("test-key".to_string());
        config
    }

    #[test]
    fn test_defaults_with_key_are_valid() {
        assert!(validate(&create_test_config()).is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = create_test_config();
        config.crawler.min_concurrency = 0;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.crawler.initial_concurrency = 4;
        config.crawler.max_concurrency = Some(2);
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.crawler.initial_concurrency = 101;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.crawler.min_concurrency = 2;
        config.crawler.initial_concurrency = 3;
        config.crawler.max_concurrency = Some(10);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_politeness_window() {
        let mut config = create_test_config();
        config.crawler.politeness_min_ms = 10;
        config.crawler.politeness_max_ms = 5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_retry_limits() {
        let mut config = create_test_config();
        config.retry.max_retries = 0;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.retry.timeout_ms = 50;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.retry.max_retry_after_ms = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_direct_backend_needs_no_key() {
        let mut config = Config::default();
        config.fetcher.backend = FetcherBackend::Direct;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = create_test_config();
        config.fetcher.api_endpoint = "not a url".to_string();
        assert!(matches!(validate(&config).unwrap_err(), ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn test_empty_output_dir_and_pattern() {
        let mut config = create_test_config();
        config.output.output_dir = " ".to_string();
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.exclude = vec![String::new()];
        assert!(validate(&config).is_err());
    }
}
