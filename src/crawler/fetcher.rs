//! HTTP fetch transports
//!
//! This module holds the transport layer under the retry policy:
//! - The `Fetcher` trait every transport implements
//! - A scraping-API transport that fetches through the remote backend
//! - A direct transport that talks to the target with plain HTTP
//! - Classification of transport errors into timeouts, network errors and the rest
//!
//! Transports never retry. Status codes are returned as-is and interpreted by
//! the retry policy.

use crate::config::{FetcherBackend, FetcherConfig};
use crate::state::ScrapeParams;
use crate::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Error raised when a request produced no HTTP response at all
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the request timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS failure or a broken body stream
    #[error("network error: {0}")]
    Network(String),

    /// Anything else (malformed request, unreadable backend envelope)
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
            TransportError::Network(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// A response as returned by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// HTTP status code of the target's response
    pub status_code: u16,

    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: String,

    /// URL the response was served from
    pub final_url: String,

    /// URLs the transport was redirected through before `final_url`,
    /// starting with the requested URL; empty when not redirected
    pub redirect_history: Vec<String>,
}

impl FetchResponse {
    /// Creates a response without headers or redirects
    pub fn new(status_code: u16, final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: body.into(),
            final_url: final_url.into(),
            redirect_history: Vec::new(),
        }
    }

    /// Adds a header, lowercasing its name
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    /// Parses the `Retry-After` header
    ///
    /// Accepts delay-seconds (fractional values included) and HTTP-dates.
    /// A date in the past yields a zero delay.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after").and_then(parse_retry_after)
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    // Delays too large for a Duration saturate; callers apply their own ceiling
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return Some(value.parse::<u64>().map_or(Duration::MAX, Duration::from_secs));
    }

    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        return Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// A transport that performs single HTTP requests
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs one request for `url` with the given parameters
    ///
    /// Non-2xx status codes are not errors. An `Err` means no response was
    /// received.
    async fn fetch(&self, url: &str, params: &ScrapeParams) -> Result<FetchResponse, TransportError>;
}

/// Builds the transport selected in the configuration
///
/// # Arguments
///
/// * `config` - The fetcher configuration
/// * `max_redirect_hops` - Longest redirect chain the transport follows on its own
///
/// # Returns
///
/// * `Ok(Arc<dyn Fetcher>)` - Ready-to-use transport
/// * `Err(ConfigError)` - Missing API key or unusable endpoint
pub fn build_fetcher(config: &FetcherConfig, max_redirect_hops: usize) -> Result<Arc<dyn Fetcher>, ConfigError> {
    match config.backend {
        FetcherBackend::Direct => {
            let fetcher = DirectFetcher::new(max_redirect_hops)
                .map_err(|e| ConfigError::Validation(format!("Failed to build HTTP client: {}", e)))?;
            Ok(Arc::new(fetcher))
        }
        FetcherBackend::ScrapeApi => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ConfigError::MissingCredentials("scrape-api backend needs an API key".to_string()))?;
            let endpoint = Url::parse(&config.api_endpoint)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_endpoint: {}", e)))?;
            let fetcher = ScrapeApiFetcher::new(endpoint, api_key)
                .map_err(|e| ConfigError::Validation(format!("Failed to build HTTP client: {}", e)))?;
            Ok(Arc::new(fetcher))
        }
    }
}

/// Builds the shared HTTP client
///
/// Redirects other than 301 are followed up to `max_redirect_hops`; a 301 is
/// handed back so the retry policy can record and follow it itself. No
/// overall timeout is set here, the retry policy bounds every request.
pub fn build_http_client(max_redirect_hops: usize) -> Result<Client, reqwest::Error> {
    let policy = Policy::custom(move |attempt| {
        if attempt.status() == StatusCode::MOVED_PERMANENTLY {
            attempt.stop()
        } else if attempt.previous().len() > max_redirect_hops {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(policy)
        .gzip(true)
        .brotli(true)
        .build()
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn parse_method(method: &str) -> Result<Method, TransportError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| TransportError::Other(format!("invalid HTTP method: {}", method)))
}

/// Plain HTTP transport straight to the target
pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    /// Creates a direct transport with its own HTTP client
    pub fn new(max_redirect_hops: usize) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(max_redirect_hops)?,
        })
    }
}

#[async_trait]
impl Fetcher for DirectFetcher {
    async fn fetch(&self, url: &str, params: &ScrapeParams) -> Result<FetchResponse, TransportError> {
        let method = parse_method(&params.method)?;
        let mut request = self.client.request(method, url);

        for (name, value) in &params.headers {
            // The client negotiates only the encodings it can decode
            if name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = lowercase_headers(response.headers());
        let body = response.text().await?;

        let redirect_history = if final_url != url {
            vec![url.to_string()]
        } else {
            Vec::new()
        };

        Ok(FetchResponse {
            status_code,
            headers,
            body,
            final_url,
            redirect_history,
        })
    }
}

/// Envelope returned by the scraping API
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    result: ApiResult,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    status_code: u16,

    #[serde(default)]
    response_headers: HashMap<String, serde_json::Value>,

    #[serde(default)]
    content: String,

    #[serde(default)]
    url: Option<String>,
}

/// Transport that fetches through the remote scraping API
///
/// The target's status, headers and body are unwrapped from the API's JSON
/// envelope. When the API itself rate-limits the caller, its 429 is returned
/// as the response so the concurrency controller sees it.
pub struct ScrapeApiFetcher {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl ScrapeApiFetcher {
    pub fn new(endpoint: Url, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }

    /// Builds the API request URL for a target
    pub fn request_url(&self, url: &str, params: &ScrapeParams) -> Url {
        let mut api_url = self.endpoint.clone();
        {
            let mut query = api_url.query_pairs_mut();
            query
                .append_pair("key", &self.api_key)
                .append_pair("url", url)
                .append_pair("render_js", bool_param(params.render_js))
                .append_pair("asp", bool_param(params.asp))
                .append_pair("debug", bool_param(params.debug));

            if let Some(country) = &params.country {
                query.append_pair("country", country);
            }

            for (name, value) in &params.headers {
                query.append_pair(&format!("headers[{}]", name.to_ascii_lowercase()), value);
            }
        }
        api_url
    }
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn header_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(header_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[async_trait]
impl Fetcher for ScrapeApiFetcher {
    async fn fetch(&self, url: &str, params: &ScrapeParams) -> Result<FetchResponse, TransportError> {
        let method = parse_method(&params.method)?;
        let api_url = self.request_url(url, params);

        let response = self.client.request(method, api_url).send().await?;
        let api_status = response.status();
        let api_headers = lowercase_headers(response.headers());
        let body = response.text().await?;

        if api_status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FetchResponse {
                status_code: api_status.as_u16(),
                headers: api_headers,
                body,
                final_url: url.to_string(),
                redirect_history: Vec::new(),
            });
        }

        let envelope: ApiEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            // Backend outages are retried like target-side 5xx
            Err(_) if api_status.is_server_error() => {
                return Ok(FetchResponse {
                    status_code: api_status.as_u16(),
                    headers: api_headers,
                    body,
                    final_url: url.to_string(),
                    redirect_history: Vec::new(),
                });
            }
            Err(e) => {
                return Err(TransportError::Other(format!(
                    "unreadable scrape API response (HTTP {}): {}",
                    api_status.as_u16(),
                    e
                )));
            }
        };

        let result = envelope.result;
        let headers = result
            .response_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), header_value(value)))
            .collect();

        let final_url = result.url.filter(|u| !u.is_empty()).unwrap_or_else(|| url.to_string());
        let redirect_history = if final_url != url {
            vec![url.to_string()]
        } else {
            Vec::new()
        };

        Ok(FetchResponse {
            status_code: result.status_code,
            headers,
            body: result.content,
            final_url,
            redirect_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> FetcherConfig {
        FetcherConfig {
            api_key: Some("test-key".to_string()),
            ..FetcherConfig::default()
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(10).is_ok());
    }

    #[test]
    fn test_build_fetcher_for_each_backend() {
        let config = create_test_config();
        assert!(build_fetcher(&config, 10).is_ok());

        let mut config = create_test_config();
        config.api_key = None;
        assert!(matches!(
            build_fetcher(&config, 10).err(),
            Some(ConfigError::MissingCredentials(_))
        ));

        config.backend = FetcherBackend::Direct;
        assert!(build_fetcher(&config, 10).is_ok());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = FetchResponse::new(200, "https://example.com/", "")
            .with_header("Content-Type", "text/html")
            .with_header("Location", "/next");

        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(response.location(), Some("/next"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let response = FetchResponse::new(429, "https://example.com/", "").with_header("Retry-After", "2");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(2)));

        let response = FetchResponse::new(429, "https://example.com/", "").with_header("Retry-After", "0.5");
        assert_eq!(response.retry_after(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let past = FetchResponse::new(429, "https://example.com/", "")
            .with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(past.retry_after(), Some(Duration::ZERO));

        let garbage = FetchResponse::new(429, "https://example.com/", "").with_header("Retry-After", "soon");
        assert_eq!(garbage.retry_after(), None);
    }

    #[test]
    fn test_retry_after_out_of_range_saturates() {
        for value in ["99999999999999999999", "1e20", "inf"] {
            let response = FetchResponse::new(429, "https://example.com/", "").with_header("Retry-After", value);
            assert_eq!(response.retry_after(), Some(Duration::MAX), "{}", value);
        }

        let negative = FetchResponse::new(429, "https://example.com/", "").with_header("Retry-After", "-3");
        assert_eq!(negative.retry_after(), None);
    }

    #[test]
    fn test_transport_error_retryability() {
        assert!(TransportError::Timeout("t".into()).is_retryable());
        assert!(TransportError::Network("n".into()).is_retryable());
        assert!(!TransportError::Other("o".into()).is_retryable());
    }

    #[test]
    fn test_scrape_api_request_url() {
        let fetcher = ScrapeApiFetcher::new(Url::parse("https://api.example.com/scrape").unwrap(), "k").unwrap();
        let mut params = ScrapeParams {
            country: Some("de".to_string()),
            ..ScrapeParams::default()
        };
        params.headers.clear();
        params.headers.insert("X-Test".to_string(), "1".to_string());

        let url = fetcher.request_url("https://target.com/a?b=c", &params);
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs.get("key").map(String::as_str), Some("k"));
        assert_eq!(pairs.get("url").map(String::as_str), Some("https://target.com/a?b=c"));
        assert_eq!(pairs.get("render_js").map(String::as_str), Some("false"));
        assert_eq!(pairs.get("asp").map(String::as_str), Some("true"));
        assert_eq!(pairs.get("country").map(String::as_str), Some("de"));
        assert_eq!(pairs.get("headers[x-test]").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_header_value_flattens_arrays() {
        let value = serde_json::json!(["a=1", "b=2"]);
        assert_eq!(header_value(value), "a=1, b=2");
        assert_eq!(header_value(serde_json::json!(5)), "5");
    }
}
