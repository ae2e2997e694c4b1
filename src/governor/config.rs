//! Governor configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Starting delay between dispatches.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Ceiling for the backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Configuration for one request governor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Delay between dispatches when the remote is healthy.
    #[serde(with = "millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Maximum delay reached by exponential backoff.
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Queued requests older than this are failed instead of dispatched.
    /// Unset means a request waits indefinitely.
    #[serde(
        with = "opt_millis",
        rename = "max_queue_wait_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_queue_wait: Option<Duration>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_queue_wait: None,
        }
    }
}

impl GovernorConfig {
    pub fn with_delays(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_max_queue_wait(mut self, wait: Duration) -> Self {
        self.max_queue_wait = Some(wait);
        self
    }
}

/// Point-in-time statistics for a governor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub queued: usize,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
