//! Scripted in-memory transport for crawler tests

use crate::crawler::fetcher::{FetchResponse, Fetcher, TransportError};
use crate::state::ScrapeParams;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One scripted reaction to a request
#[derive(Debug, Clone)]
pub enum Step {
    Respond(FetchResponse),
    Fail(TransportError),
    /// Never answers within any sane timeout
    Hang,
}

/// Transport replaying per-URL scripts
///
/// URLs without a remaining step answer 404.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, url: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Requested URLs in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    /// Instants at which `url` was requested
    pub fn call_times(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _params: &ScrapeParams) -> Result<FetchResponse, TransportError> {
        self.calls.lock().unwrap().push((url.to_string(), Instant::now()));

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(url).and_then(VecDeque::pop_front)
        };

        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(TransportError::Timeout("hung".to_string()))
            }
            None => Ok(FetchResponse::new(404, url, "not found")),
        }
    }
}

/// An HTML response served from `url`
pub fn html(url: &str, body: &str) -> Step {
    Step::Respond(FetchResponse::new(200, url, body).with_header("Content-Type", "text/html; charset=utf-8"))
}

/// A bare status response served from `url`
pub fn status(url: &str, code: u16) -> Step {
    Step::Respond(FetchResponse::new(code, url, ""))
}
