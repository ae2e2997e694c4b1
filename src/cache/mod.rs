//! Caching for remote profile data.
//!
//! A per-process TTL map sits in front of a durable store. Durable values
//! carry a write timestamp so a restarted process can serve them while it
//! refreshes anything older than the freshness window.

mod clock;
mod key;
pub mod store;
mod tiered;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{belongs_to_resource, resource_prefix, CacheKey};
pub use store::{DurableStore, JsonFileStore, MemoryStore, StoreError, StoreResult};
pub use tiered::{TieredCache, DEFAULT_FRESHNESS};
pub use ttl::TtlCache;
