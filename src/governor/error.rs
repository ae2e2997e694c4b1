//! Error taxonomy for governed requests.

use std::time::Duration;

use thiserror::Error;

/// Outcome classification for a single attempt against a remote API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// HTTP 429. Retried by the governor, never surfaced to callers.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Remote error {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}

/// Terminal failure of a governed request as seen by its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The governor stopped before the request settled.
    #[error("Request cancelled before completion")]
    Cancelled,
    #[error("Request expired after waiting {waited:?} in queue")]
    Expired { waited: Duration },
    /// The request future panicked. Other queued requests are unaffected.
    #[error("Request panicked while in flight")]
    Panicked,
}
