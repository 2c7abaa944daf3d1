//! Adaptive concurrency control
//!
//! Concurrency follows an additive-increase / additive-decrease scheme driven
//! by rate-limit responses:
//! - A 429 lowers concurrency by one and extends the rate-limit streak. Its
//!   `Retry-After`, if present, becomes a one-shot delay before the next request
//! - Any other status clears the streak and raises concurrency by one
//!
//! Concurrency always stays within the configured `[min, max]` bounds.

use crate::config::CrawlerConfig;
use std::time::Duration;
use tokio::sync::Mutex;

/// Plain controller state, shared behind `ConcurrencyController`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    concurrency: usize,
    min: usize,
    max: usize,
    pending_delay: Option<Duration>,
    consecutive_rate_limit_hits: u32,
}

impl ControllerState {
    /// Creates a state at `initial`, clamped to `[min, max]`
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            concurrency: initial.clamp(min, max),
            min,
            max,
            pending_delay: None,
            consecutive_rate_limit_hits: 0,
        }
    }

    /// Folds one response status into the state
    ///
    /// # Arguments
    ///
    /// * `status_code` - HTTP status of the response
    /// * `retry_after` - Parsed `Retry-After` header, if any
    pub fn on_response(&mut self, status_code: u16, retry_after: Option<Duration>) {
        if status_code == 429 {
            self.consecutive_rate_limit_hits += 1;
            self.concurrency = self.concurrency.saturating_sub(1).max(self.min);
            if let Some(delay) = retry_after {
                self.pending_delay = Some(delay);
            }
        } else {
            self.consecutive_rate_limit_hits = 0;
            self.concurrency = (self.concurrency + 1).min(self.max);
        }
    }

    /// Removes and returns the one-shot delay
    pub fn take_pending_delay(&mut self) -> Option<Duration> {
        self.pending_delay.take()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending_delay
    }

    pub fn consecutive_rate_limit_hits(&self) -> u32 {
        self.consecutive_rate_limit_hits
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }
}

/// Concurrency controller shared by all in-flight fetches
///
/// Updates are serialized by an async mutex. The gate holds the lock while it
/// sleeps off a pending delay, so every fetch reaching the gate in that window
/// waits with it and the delay is consumed exactly once.
#[derive(Debug)]
pub struct ConcurrencyController {
    state: Mutex<ControllerState>,
}

impl ConcurrencyController {
    /// Creates a controller from the crawler configuration
    pub fn new(config: &CrawlerConfig) -> Self {
        Self::with_bounds(
            config.initial_concurrency,
            config.min_concurrency,
            config.max_concurrency(),
        )
    }

    pub fn with_bounds(initial: usize, min: usize, max: usize) -> Self {
        Self {
            state: Mutex::new(ControllerState::new(initial, min, max)),
        }
    }

    /// Records a response
    pub async fn on_response(&self, status_code: u16, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        let before = state.concurrency();
        state.on_response(status_code, retry_after);

        if status_code == 429 {
            tracing::warn!(
                "Rate limited (streak {}), concurrency {} -> {}{}",
                state.consecutive_rate_limit_hits(),
                before,
                state.concurrency(),
                retry_after
                    .map(|d| format!(", waiting {:.1}s before the next request", d.as_secs_f64()))
                    .unwrap_or_default()
            );
        } else if state.concurrency() != before {
            tracing::debug!("Concurrency {} -> {}", before, state.concurrency());
        }
    }

    /// Waits out a pending delay, if any, before a request is sent
    pub async fn await_gate(&self) {
        let mut state = self.state.lock().await;
        if let Some(delay) = state.take_pending_delay() {
            tracing::debug!("Honoring Retry-After of {:.1}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }

    /// Current concurrency level
    pub async fn concurrency(&self) -> usize {
        self.state.lock().await.concurrency()
    }

    /// Copy of the current state
    pub async fn state(&self) -> ControllerState {
        self.state.lock().await.clone()
    }
}
