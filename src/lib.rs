//! Outbound API governance for profile enrichment.
//!
//! - [`governor`]: one serialized, backoff-aware request queue per API
//! - [`credentials`]: round-robin pools of API keys and client pairs
//! - [`cache`]: in-memory TTL cache over a durable store, with
//!   stale-while-revalidate reads
//! - [`integrations`]: Last.fm and Spotify clients built on the above

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod governor;
pub mod http_client;
pub mod integrations;

pub use cache::{CacheKey, TieredCache};
pub use credentials::{Credential, KeyRotator};
pub use governor::{FetchError, GovernorConfig, GovernorError, RequestGovernor};
