//! Request governor for rate-limited third-party APIs.
//!
//! Serializes outbound calls so at most one request per API is in flight,
//! retries rate-limited requests ahead of newer work, and backs off
//! exponentially while the remote keeps answering 429.
//!
//! Used by every integration (Last.fm, Spotify) with one governor per API.

mod backoff;
mod config;
mod error;
mod queue;
mod sleeper;

pub use backoff::BackoffState;
pub use config::{GovernorConfig, GovernorStats, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use error::{FetchError, GovernorError};
pub use queue::{RequestFuture, RequestGovernor};
pub use sleeper::{Sleeper, TokioSleeper};

use std::time::Duration;

/// Upper bound honoured for a server-provided Retry-After.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Exponential backoff delay for a given number of consecutive rate limits.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(cap_ms))
}

/// Get delay from environment variable, with default fallback.
pub fn get_delay_from_env(env_var: &str, default_ms: u64) -> Duration {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}
