//! Delay abstraction so dispatch pacing can be observed without timers.

use std::time::Duration;

use async_trait::async_trait;

/// Waits between governed dispatches.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }
    }
}
