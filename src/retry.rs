//! Request pacing and bounded retry.
//!
//! Every outbound call goes through [`with_backoff`]: the operation reports an
//! [`Attempt`], and only [`Attempt::Retry`] outcomes are repeated, up to
//! `RetryPolicy::max_attempts` in total.

use crate::config::RetryPolicy;
use crate::error::{AffilError, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a single request attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Success
    Done(T),
    /// Transient failure (timeout, 429, 5xx); worth another try
    Retry(AffilError),
    /// Permanent failure (4xx, undecodable body); give up now
    Fail(AffilError),
}

/// Run `op` until it succeeds, fails permanently or the attempts run out.
///
/// Waits `policy.delay_for(n)` (plus a little jitter) between attempts; a
/// `Retry-After` hint from a rate-limited response raises the wait, up to
/// `policy.max_delay`.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match op().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(e) => {
                debug!(label, attempt = attempt + 1, error = %e, "Permanent failure");
                return Err(e);
            }
            Attempt::Retry(e) => e,
        };

        attempt += 1;
        if attempt >= max_attempts {
            warn!(label, attempts = attempt, error = %error, "Giving up after retries");
            return Err(error);
        }

        let mut wait = policy.delay_for(attempt - 1);
        if let AffilError::RateLimited(secs) = &error {
            wait = wait.max(Duration::from_secs(*secs).min(policy.max_delay));
        }
        wait += jitter(wait);

        warn!(
            label,
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "Transient failure, backing off"
        );
        tokio::time::sleep(wait).await;
    }
}

/// Up to a quarter of `wait`
fn jitter(wait: Duration) -> Duration {
    let max = (wait.as_millis() / 4) as u64;
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Send a GET request and decode its JSON body, classifying any failure.
pub async fn get_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Attempt<T> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return classify_transport(e),
    };

    let status = response.status();
    if !status.is_success() {
        return classify_failure(status, response.headers());
    }

    match response.json::<T>().await {
        Ok(body) => Attempt::Done(body),
        Err(e) => classify_transport(e),
    }
}

/// Map a non-success HTTP status to a retryable or permanent failure.
pub fn classify_failure<T>(status: StatusCode, headers: &HeaderMap) -> Attempt<T> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        return Attempt::Retry(AffilError::RateLimited(retry_after));
    }

    let error = AffilError::Api {
        code: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    };

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Attempt::Retry(error)
    } else {
        Attempt::Fail(error)
    }
}

fn classify_transport<T>(e: reqwest::Error) -> Attempt<T> {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Attempt::Retry(AffilError::Network(e))
    } else {
        Attempt::Fail(AffilError::Network(e))
    }
}

/// Minimum spacing between consecutive HTTP calls, shared by all clients.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Create a pacer; the first call never waits.
    ///
    /// # Arguments
    ///
    /// * `interval` - Minimum time between the starts of two calls
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// Sleep until `interval` has passed since the previous call, then claim the slot.
    pub async fn wait(&self) {
        let remaining = {
            let last = self.last_request.lock().ok();
            last.and_then(|l| *l)
                .map(|t| self.interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }

        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(Instant::now());
        }
    }
}
