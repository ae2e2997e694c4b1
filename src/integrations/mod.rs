//! Third-party profile integrations.
//!
//! Each API gets its own credential pool and governor. All of them share
//! one tiered cache.

pub mod lastfm;
pub mod spotify;

pub use lastfm::{LastFm, Period, RecentTrack, TopArtist};
pub use spotify::{Endpoints, Spotify};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::cache::{DurableStore, JsonFileStore, MemoryStore, StoreError, SystemClock, TieredCache};
use crate::config::{Config, ConfigError, Settings, StoreBackend};
use crate::credentials::KeyRotator;
use crate::governor::{FetchError, RequestGovernor};
use crate::http_client::ApiClient;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open cache store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to create HTTP client: {0}")]
    Http(#[from] FetchError),
}

/// Everything a caller needs to enrich a profile.
#[derive(Clone)]
pub struct Integrations {
    pub lastfm: LastFm,
    pub spotify: Spotify,
    pub cache: TieredCache,
}

impl Integrations {
    /// Build pools, governors and the cache from config and the process
    /// environment.
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let settings = config.settings()?;
        let store = open_store(&settings).await?;
        info!("Cache store: {}", settings.store.describe());

        let cache = TieredCache::with_clock(
            store,
            Arc::new(SystemClock),
            Duration::from_secs(config.cache.freshness_secs),
        );
        let client = ApiClient::new(&config.http.user_agent, config.http.timeout())?;

        let lastfm_keys = Arc::new(KeyRotator::new(config.lastfm.keys.read_env()));
        let spotify_pairs = Arc::new(KeyRotator::new(config.spotify.credentials.read_env()));
        info!(
            "Loaded {} Last.fm key(s) and {} Spotify client pair(s)",
            lastfm_keys.len(),
            spotify_pairs.len()
        );

        Ok(Self::build(config, client, lastfm_keys, spotify_pairs, cache))
    }

    /// Assemble integrations from already-built parts.
    pub fn build(
        config: &Config,
        client: ApiClient,
        lastfm_keys: Arc<KeyRotator>,
        spotify_pairs: Arc<KeyRotator>,
        cache: TieredCache,
    ) -> Self {
        let lastfm = LastFm::new(
            client.clone(),
            lastfm_keys,
            RequestGovernor::new("lastfm", config.lastfm_governor()),
            cache.clone(),
        )
        .with_base_url(config.lastfm.base_url.clone())
        .with_ttls(
            Duration::from_secs(config.lastfm.recent_ttl_secs),
            Duration::from_secs(config.lastfm.top_artists_ttl_secs),
        );

        let spotify = Spotify::new(
            client,
            spotify_pairs,
            RequestGovernor::new("spotify", config.spotify_governor()),
            cache.clone(),
            config.spotify.default_artwork.clone(),
        )
        .with_endpoints(Endpoints {
            token_url: config.spotify.token_url.clone(),
            search_url: config.spotify.search_url.clone(),
        })
        .with_artwork_ttl(Duration::from_secs(config.spotify.artwork_ttl_secs));

        Self {
            lastfm,
            spotify,
            cache,
        }
    }
}

/// Open the durable store selected in settings.
pub async fn open_store(settings: &Settings) -> Result<Arc<dyn DurableStore>, SetupError> {
    let store: Arc<dyn DurableStore> = match &settings.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File(path) => Arc::new(JsonFileStore::new(path.clone())),
        #[cfg(feature = "redis-backend")]
        StoreBackend::Redis(url) => Arc::new(crate::cache::store::RedisStore::new(url).await?),
        #[cfg(not(feature = "redis-backend"))]
        StoreBackend::Redis(_) => {
            return Err(StoreError::Unavailable(
                "Redis support not compiled in (enable the redis-backend feature)".to_string(),
            )
            .into())
        }
    };
    Ok(store)
}
