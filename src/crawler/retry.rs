//! Fetch policy: bounded retries with exponential backoff
//!
//! One call to [`RetryPolicy::fetch_with_retry`] runs the full attempt
//! sequence for a single URL:
//!
//! | Condition | Action |
//! |-----------|--------|
//! | 2xx, 3xx (other than 301), 4xx | Returned immediately |
//! | 301 | `Location` followed once, result returned |
//! | 5xx | Retried, returned as-is on the final attempt |
//! | 429 | Retried after `Retry-After` (or backoff), returned as-is on the final attempt |
//! | Timeout, network error | Retried, terminal failure once attempts run out |
//! | Other transport error | Terminal failure |
//!
//! Attempt `n >= 1` first sleeps `base_delay * 2^n` plus a small random jitter.

use crate::config::RetryConfig;
use crate::crawler::fetcher::{FetchResponse, Fetcher, TransportError};
use crate::crawler::rate_limiter::ConcurrencyController;
use crate::state::{ScrapeParams, Timing};
use crate::url::has_resource_extension;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// Content types whose bodies are never logged or parsed
const BINARY_CONTENT_TYPES: &[&str] = &["image/", "video/", "audio/", "application/octet-stream"];

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 4xx response
    ClientError,
    /// 5xx response after all attempts
    ServerError,
    /// 429 response after all attempts
    RateLimited,
    /// Timeouts or connection failures after all attempts
    NetworkError,
    /// Redirect chain longer than the hop cap
    RedirectLimit,
    /// Redirect back to a URL already in the chain
    RedirectLoop,
    /// Non-retryable transport error
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ClientError => "client_error",
            FailureKind::ServerError => "server_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::NetworkError => "network_error",
            FailureKind::RedirectLimit => "redirect_limit",
            FailureKind::RedirectLoop => "redirect_loop",
            FailureKind::Transport => "transport",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal failure of one URL
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub attempts: u32,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            attempts: 0,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// A response the policy settled on, with the bookkeeping of how it got there
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// The frontier key that was requested
    pub url: String,
    pub status_code: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
    pub final_url: String,
    /// Every URL from the request to `final_url`; empty when not redirected
    pub redirect_chain: Vec<String>,
    pub timing: Timing,
}

impl FetchedPage {
    fn from_response(
        url: &str,
        response: FetchResponse,
        redirect_chain: Vec<String>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            url: url.to_string(),
            status_code: response.status_code,
            headers: response.headers,
            body: response.body,
            final_url: response.final_url,
            redirect_chain,
            timing: Timing {
                attempts,
                elapsed_ms: elapsed.as_millis() as u64,
            },
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_redirected(&self) -> bool {
        !self.redirect_chain.is_empty()
    }

    /// Whether the body is binary, by content type or by URL extension
    pub fn is_binary(&self) -> bool {
        let by_type = self.content_type().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            BINARY_CONTENT_TYPES.iter().any(|t| ct.contains(t))
        });

        by_type || has_resource_extension(&self.url) || has_resource_extension(&self.final_url)
    }
}

/// Outcome of one URL as folded into the frontier
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(FetchedPage),
    Failure(FetchFailure),
}

impl FetchOutcome {
    /// Maps the policy's result onto success or failure
    ///
    /// Responses the policy returns as-is still fail here when they carry a
    /// 4xx, an exhausted 429 or an exhausted 5xx.
    pub fn classify(result: Result<FetchedPage, FetchFailure>) -> Self {
        let page = match result {
            Ok(page) => page,
            Err(failure) => return FetchOutcome::Failure(failure),
        };

        let kind = match page.status_code {
            429 => FailureKind::RateLimited,
            400..=499 => FailureKind::ClientError,
            500..=599 => FailureKind::ServerError,
            _ => return FetchOutcome::Success(page),
        };

        FetchOutcome::Failure(
            FetchFailure::new(kind, format!("HTTP {}", page.status_code))
                .with_status(page.status_code)
                .with_attempts(page.timing.attempts),
        )
    }
}

/// Why following a 301 stopped
enum FollowError {
    Transport(TransportError),
    Redirect(FetchFailure),
}

/// Retry policy shared by all fetches of a crawl
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Request attempts per URL
    pub max_retries: u32,
    /// Base of the exponential backoff
    pub base_delay: Duration,
    /// Bound on each individual request
    pub timeout: Duration,
    /// Longest redirect chain accepted
    pub max_redirect_hops: usize,
    /// Ceiling on a server-requested `Retry-After` wait
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            timeout: config.timeout(),
            max_redirect_hops: config.max_redirect_hops,
            max_retry_after: config.max_retry_after(),
        }
    }

    /// `Retry-After` of a response, clamped to `max_retry_after`
    pub fn retry_after_of(&self, response: &FetchResponse) -> Option<Duration> {
        let delay = response.retry_after()?;
        if delay > self.max_retry_after {
            tracing::warn!(
                "Retry-After of {} for {} exceeds {:.0}s, capping",
                response.header("retry-after").unwrap_or_default(),
                response.final_url,
                self.max_retry_after.as_secs_f64()
            );
            return Some(self.max_retry_after);
        }
        Some(delay)
    }

    /// Delay before attempt `attempt`: `base_delay * 2^attempt` plus jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor) + self.jitter()
    }

    /// Uniform jitter in `[1ms, base_delay / 4]`
    fn jitter(&self) -> Duration {
        let max_ms = ((self.base_delay.as_millis() / 4) as u64).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(1..=max_ms))
    }

    /// Fetches one URL, retrying as the policy allows
    ///
    /// Every attempt passes the controller's gate first and reports its
    /// response status back to the controller.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Transport performing the requests
    /// * `controller` - Concurrency controller of the crawl
    /// * `url` - Normalized frontier key
    /// * `params` - Parameters to fetch with
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - A response, possibly a final 4xx/5xx/429 returned as-is
    /// * `Err(FetchFailure)` - No usable response
    pub async fn fetch_with_retry(
        &self,
        fetcher: &dyn Fetcher,
        controller: &ConcurrencyController,
        url: &str,
        params: &ScrapeParams,
    ) -> Result<FetchedPage, FetchFailure> {
        let started = Instant::now();
        let mut last_error: Option<TransportError> = None;
        let mut skip_backoff = false;

        for attempt in 0..self.max_retries {
            let attempts = attempt + 1;
            let is_last = attempts == self.max_retries;

            if attempt > 0 && !skip_backoff {
                let delay = self.backoff_delay(attempt);
                tracing::debug!(
                    "Retrying {} (attempt {}/{}) in {:.1}s",
                    url,
                    attempts,
                    self.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            skip_backoff = false;

            controller.await_gate().await;

            let response = match self.send(fetcher, url, params, attempt == 0).await {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Attempt {}/{} for {} failed: {}", attempts, self.max_retries, url, e);
                    last_error = Some(e);
                    continue;
                }
                Err(e) => {
                    return Err(FetchFailure::new(FailureKind::Transport, e.to_string()).with_attempts(attempts));
                }
            };

            let retry_after = self.retry_after_of(&response);
            controller.on_response(response.status_code, retry_after).await;
            tracing::trace!("Attempt {} for {} answered {}", attempts, url, response.status_code);

            match response.status_code {
                301 => match self.follow_moved_permanently(fetcher, controller, url, params, response).await {
                    Ok((followed, chain)) => {
                        return Ok(FetchedPage::from_response(url, followed, chain, attempts, started.elapsed()));
                    }
                    Err(FollowError::Transport(e)) if e.is_retryable() => {
                        tracing::warn!("Following redirect of {} failed: {}", url, e);
                        last_error = Some(e);
                    }
                    Err(FollowError::Transport(e)) => {
                        return Err(FetchFailure::new(FailureKind::Transport, e.to_string()).with_attempts(attempts));
                    }
                    Err(FollowError::Redirect(failure)) => return Err(failure.with_attempts(attempts)),
                },
                429 if !is_last => {
                    // With Retry-After the controller's gate does the waiting
                    skip_backoff = retry_after.is_some();
                }
                status if (500..600).contains(&status) && !is_last => {
                    tracing::warn!("Server error {} for {}, attempt {}/{}", status, url, attempts, self.max_retries);
                }
                _ => {
                    let chain = transport_chain(&response);
                    return Ok(FetchedPage::from_response(url, response, chain, attempts, started.elapsed()));
                }
            }
        }

        let message = match last_error {
            Some(e) => format!("giving up after {} attempts: {}", self.max_retries, e),
            None => format!("giving up after {} attempts", self.max_retries),
        };
        Err(FetchFailure::new(FailureKind::NetworkError, message).with_attempts(self.max_retries))
    }

    /// Sends one request, falling back to plain HTTP on a first-attempt HTTPS timeout
    ///
    /// A page served by the fallback keeps the requested URL as its final
    /// URL, so it is neither tracked twice nor crawled onward over plain HTTP.
    async fn send(
        &self,
        fetcher: &dyn Fetcher,
        url: &str,
        params: &ScrapeParams,
        first_attempt: bool,
    ) -> Result<FetchResponse, TransportError> {
        match self.request_with_timeout(fetcher, url, params).await {
            Err(TransportError::Timeout(reason)) if first_attempt => match http_fallback(url) {
                Some(fallback) => {
                    tracing::warn!("Timeout on {} ({}), trying {} once", url, reason, fallback);
                    let mut response = self.request_with_timeout(fetcher, &fallback, params).await?;
                    if response.final_url == fallback {
                        response.final_url = url.to_string();
                    }
                    Ok(response)
                }
                None => Err(TransportError::Timeout(reason)),
            },
            other => other,
        }
    }

    async fn request_with_timeout(
        &self,
        fetcher: &dyn Fetcher,
        url: &str,
        params: &ScrapeParams,
    ) -> Result<FetchResponse, TransportError> {
        match tokio::time::timeout(self.timeout, fetcher.fetch(url, params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no response from {} within {:.1}s",
                url,
                self.timeout.as_secs_f64()
            ))),
        }
    }

    /// Re-issues the request against the `Location` of a 301, once
    async fn follow_moved_permanently(
        &self,
        fetcher: &dyn Fetcher,
        controller: &ConcurrencyController,
        url: &str,
        params: &ScrapeParams,
        response: FetchResponse,
    ) -> Result<(FetchResponse, Vec<String>), FollowError> {
        let Some(location) = response.location().map(str::to_string) else {
            tracing::debug!("301 without Location for {}", url);
            let chain = transport_chain(&response);
            return Ok((response, chain));
        };

        let target = Url::parse(&response.final_url)
            .and_then(|base| base.join(location.trim()))
            .map_err(|e| {
                FollowError::Redirect(
                    FetchFailure::new(
                        FailureKind::ClientError,
                        format!("invalid Location {:?} from {}: {}", location, url, e),
                    )
                    .with_status(301),
                )
            })?
            .to_string();

        let mut chain = response.redirect_history.clone();
        chain.push(response.final_url.clone());

        if chain.contains(&target) {
            return Err(FollowError::Redirect(
                FetchFailure::new(FailureKind::RedirectLoop, format!("redirect loop at {}", target)).with_status(301),
            ));
        }
        if chain.len() > self.max_redirect_hops {
            return Err(FollowError::Redirect(self.hop_limit_failure(url)));
        }

        tracing::debug!("Following 301 {} -> {}", response.final_url, target);

        controller.await_gate().await;
        let followed = self
            .request_with_timeout(fetcher, &target, params)
            .await
            .map_err(FollowError::Transport)?;
        controller.on_response(followed.status_code, self.retry_after_of(&followed)).await;

        if chain.contains(&followed.final_url) {
            return Err(FollowError::Redirect(
                FetchFailure::new(
                    FailureKind::RedirectLoop,
                    format!("redirect loop at {}", followed.final_url),
                )
                .with_status(followed.status_code),
            ));
        }

        if followed.redirect_history.is_empty() {
            chain.push(target);
        } else {
            chain.extend(followed.redirect_history.iter().cloned());
        }
        if chain.last() != Some(&followed.final_url) {
            chain.push(followed.final_url.clone());
        }

        if chain.len() - 1 > self.max_redirect_hops {
            return Err(FollowError::Redirect(self.hop_limit_failure(url)));
        }

        Ok((followed, chain))
    }

    fn hop_limit_failure(&self, url: &str) -> FetchFailure {
        FetchFailure::new(
            FailureKind::RedirectLimit,
            format!("more than {} redirects from {}", self.max_redirect_hops, url),
        )
        .with_status(301)
    }
}

/// Redirect chain as reported by the transport
fn transport_chain(response: &FetchResponse) -> Vec<String> {
    if response.redirect_history.is_empty() {
        return Vec::new();
    }
    let mut chain = response.redirect_history.clone();
    chain.push(response.final_url.clone());
    chain
}

fn http_fallback(url: &str) -> Option<String> {
    url.strip_prefix("https://").map(|rest| format!("http://{}", rest))
}
