//! Retry and rate-limit backoff for GitHub API calls
//!
//! Two kinds of waits are handled here:
//!
//! - **Transient failures** (connect errors, timeouts, 5xx): bounded retries with
//!   exponential backoff and jitter.
//! - **Rate limits** (403/429 with `X-RateLimit-Remaining: 0` or `Retry-After`):
//!   the API dictates the wait. The whole engine pauses through a shared
//!   [`RateLimitGate`] until the reset time, then for the retry-after hint, and
//!   the identical request is retried. These waits are never counted as attempts.

use super::ApiError;
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep while waiting for a rate-limit reset; the remaining
/// time is re-logged after each slice.
pub const RESET_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Floor for a rate-limit pause whose reset time is already in the past
pub const MIN_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(1);

/// Configuration for transient-failure retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub multiplier: f64,

    /// Add random jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config for quick retries (short backoff)
    #[cfg(test)]
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate backoff duration for a given attempt
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let final_duration = if self.jitter {
            // Add 0-25% jitter
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped * jitter_factor
        } else {
            capped
        };

        Duration::from_secs_f64(final_duration)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependency
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure: retry with backoff, bounded by `max_retries`
    Retry,
    /// Rate limited: wait until `reset`, then `retry_after`, then retry without limit
    RateLimited {
        reset: Option<DateTime<Utc>>,
        retry_after: Option<Duration>,
    },
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

impl RetryableError for ApiError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            ApiError::RateLimited(info) => RetryDecision::RateLimited {
                reset: info.reset,
                retry_after: info.retry_after,
            },
            ApiError::Network(e) => {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    RetryDecision::Retry
                } else if e.is_decode() || e.is_body() {
                    RetryDecision::NoRetry
                } else {
                    match e.status().map(|s| s.as_u16()) {
                        Some(500..=599) | None => RetryDecision::Retry,
                        Some(_) => RetryDecision::NoRetry,
                    }
                }
            }
            ApiError::Status { status, .. } => match status {
                500..=599 => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            ApiError::Decode(_) => RetryDecision::NoRetry,
        }
    }
}

/// Engine-wide pause shared by every request path of one ingestion engine
///
/// GitHub rate limits are per account, so when any request is throttled all
/// requests wait.
#[derive(Debug, Clone, Default)]
pub struct RateLimitGate {
    paused_until: Arc<Mutex<Option<Instant>>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the pause to cover a rate-limit response: wait out the reset
    /// time, then the retry-after hint on top of it.
    pub fn pause(&self, reset: Option<DateTime<Utc>>, retry_after: Option<Duration>) -> Instant {
        let now = Instant::now();
        let until_reset = reset
            .and_then(|reset| (reset - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let total = (until_reset + retry_after.unwrap_or(Duration::ZERO)).max(MIN_RATE_LIMIT_PAUSE);
        let deadline = now + total;

        let mut paused_until = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = match *paused_until {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        };
        *paused_until = Some(deadline);
        deadline
    }

    /// Current pause deadline, if one is still in the future
    pub fn paused_until(&self) -> Option<Instant> {
        let paused_until = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        paused_until.filter(|deadline| *deadline > Instant::now())
    }

    /// Block until no pause is in effect, re-checking in slices so a pause
    /// extended by another request path is honored and cancellation is prompt.
    pub async fn wait(&self, shutdown: &Shutdown) -> crate::Result<()> {
        while let Some(deadline) = self.paused_until() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            info!(
                remaining_secs = remaining.as_secs(),
                "API rate limit exceeded, sleeping"
            );

            let slice = remaining.min(RESET_POLL_INTERVAL);
            tokio::select! {
                _ = sleep(slice) => {}
                _ = shutdown.triggered() => return Err(crate::ReviewGraphError::Cancelled),
            }
        }
        shutdown.check()
    }
}

/// Execute an async API call, honoring rate limits and retrying transient failures
///
/// # Arguments
/// * `config` - Transient-failure retry configuration
/// * `gate` - Shared rate-limit pause for the calling engine
/// * `shutdown` - Cancellation signal
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to execute; invoked again for each retry
///
/// # Returns
/// The result of the operation, the first permanent error, the last transient
/// error once retries are exhausted, or `Cancelled`.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    gate: &RateLimitGate,
    shutdown: &Shutdown,
    operation_name: &str,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display + Into<crate::ReviewGraphError>,
{
    let mut attempt = 0;

    loop {
        gate.wait(shutdown).await?;

        let result = tokio::select! {
            result = operation() => result,
            _ = shutdown.triggered() => return Err(crate::ReviewGraphError::Cancelled),
        };

        let e = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match e.retry_decision() {
            RetryDecision::NoRetry => {
                debug!(
                    operation = operation_name,
                    attempt = attempt,
                    "Operation failed with non-retryable error: {}",
                    e
                );
                crate::metrics::record_api_error("permanent");
                return Err(e.into());
            }
            RetryDecision::RateLimited { reset, retry_after } => {
                let deadline = gate.pause(reset, retry_after);
                warn!(
                    operation = operation_name,
                    reset = ?reset,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    pause_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                    "Rate limited, pausing all requests"
                );
                crate::metrics::record_rate_limit_wait();
            }
            RetryDecision::Retry => {
                crate::metrics::record_api_error("transient");
                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation failed after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e.into());
                }

                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    backoff_secs = backoff.as_secs_f64(),
                    "Retrying after error: {}",
                    e
                );

                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = shutdown.triggered() => return Err(crate::ReviewGraphError::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}
