//! Spotify album artwork lookup via the client-credentials flow.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheKey, TieredCache, TtlCache};
use crate::credentials::{Credential, KeyRotator};
use crate::governor::{FetchError, GovernorError, RequestGovernor};
use crate::http_client::ApiClient;

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_SEARCH_URL: &str = "https://api.spotify.com/v1/search";

/// Cache kind for artwork URLs, keyed by artist and qualified by track.
pub const ARTWORK_KIND: &str = "spotify_artwork";

/// Tokens are dropped this long before Spotify says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: String,
    pub search_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
        }
    }
}

/// Spotify client over a pool of client id/secret pairs.
#[derive(Clone)]
pub struct Spotify {
    client: ApiClient,
    pairs: Arc<KeyRotator>,
    governor: RequestGovernor<Value>,
    cache: TieredCache,
    tokens: Arc<TtlCache<String>>,
    endpoints: Endpoints,
    default_artwork: String,
    artwork_ttl: Duration,
}

impl Spotify {
    pub fn new(
        client: ApiClient,
        pairs: Arc<KeyRotator>,
        governor: RequestGovernor<Value>,
        cache: TieredCache,
        default_artwork: impl Into<String>,
    ) -> Self {
        Self {
            client,
            pairs,
            governor,
            cache,
            tokens: Arc::new(TtlCache::new()),
            endpoints: Endpoints::default(),
            default_artwork: default_artwork.into(),
            artwork_ttl: Duration::from_secs(24 * 3600),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_artwork_ttl(mut self, ttl: Duration) -> Self {
        self.artwork_ttl = ttl;
        self
    }

    pub fn pairs(&self) -> &KeyRotator {
        &self.pairs
    }

    pub fn governor(&self) -> &RequestGovernor<Value> {
        &self.governor
    }

    pub fn default_artwork(&self) -> &str {
        &self.default_artwork
    }

    /// Album artwork URL for a track, or the default artwork when there
    /// are no credentials, no match, or the lookup fails.
    pub async fn track_artwork(&self, track: &str, artist: &str) -> String {
        match self.try_track_artwork(track, artist).await {
            Ok(Some(url)) => url,
            Ok(None) => self.default_artwork.clone(),
            Err(e) => {
                warn!("Artwork lookup for '{}' by '{}' failed: {}", track, artist, e);
                self.default_artwork.clone()
            }
        }
    }

    /// Like [`track_artwork`](Self::track_artwork) but reports failures.
    pub async fn try_track_artwork(
        &self,
        track: &str,
        artist: &str,
    ) -> Result<Option<String>, GovernorError> {
        let key = CacheKey::new(ARTWORK_KIND, artist.trim().to_lowercase())
            .with_qualifier(track.trim().to_lowercase());
        if self.pairs.is_empty() {
            warn!("No Spotify client credentials configured, serving artwork from cache only");
            return Ok(self.cache.cached::<Option<String>>(&key).await.flatten());
        }

        let this = self.clone();
        let query = format!("track:{} artist:{}", track.trim(), artist.trim());
        self.cache
            .get_or_fetch(&key, self.artwork_ttl, move || async move {
                let json = this.search(query).await?;
                Ok::<_, GovernorError>(artwork_url(&json))
            })
            .await
    }

    /// Drop cached artwork for every track by `artist`.
    pub async fn invalidate_artist(&self, artist: &str) -> usize {
        self.cache
            .clear_resource(ARTWORK_KIND, &artist.trim().to_lowercase())
            .await
    }

    /// One governed search. Each attempt takes the next client pair and
    /// fetches a token for it unless one is cached.
    async fn search(&self, query: String) -> Result<Value, GovernorError> {
        let client = self.client.clone();
        let pairs = Arc::clone(&self.pairs);
        let tokens = Arc::clone(&self.tokens);
        let endpoints = self.endpoints.clone();

        self.governor
            .enqueue(move || {
                let client = client.clone();
                let credential = pairs.next();
                let tokens = Arc::clone(&tokens);
                let endpoints = endpoints.clone();
                let query = query.clone();
                async move {
                    if let Some(credential) = &credential {
                        debug!("Spotify search using {}", credential.masked());
                    }
                    let (client_id, client_secret) = match credential {
                        Some(Credential::ClientPair {
                            client_id,
                            client_secret,
                        }) => (client_id, client_secret),
                        _ => {
                            return Err(FetchError::Remote {
                                status: 401,
                                message: "no Spotify client credentials available".to_string(),
                            })
                        }
                    };

                    let token = access_token(
                        &client,
                        &tokens,
                        &endpoints.token_url,
                        &client_id,
                        &client_secret,
                    )
                    .await?;

                    let result = client
                        .get_json(
                            &endpoints.search_url,
                            &[("q", query.as_str()), ("type", "track"), ("limit", "1")],
                            Some(&token),
                        )
                        .await;
                    if let Err(FetchError::Remote { status: 401, .. }) = &result {
                        // Revoked or expired early; the next use fetches a new one.
                        tokens.remove(&client_id);
                    }
                    result
                }
            })
            .await
    }
}

/// Cached bearer token for a client pair, requesting a new one on a miss.
async fn access_token(
    client: &ApiClient,
    tokens: &TtlCache<String>,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, FetchError> {
    if let Some(token) = tokens.get(client_id) {
        return Ok(token);
    }

    debug!("Requesting Spotify access token");
    let json = client
        .post_form_basic(
            token_url,
            &[("grant_type", "client_credentials")],
            client_id,
            client_secret,
        )
        .await?;
    let (token, expires_in) = parse_token(&json)?;
    tokens.set(client_id, token.clone(), expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN));
    Ok(token)
}

/// Access token and lifetime from a token endpoint reply.
pub fn parse_token(json: &Value) -> Result<(String, Duration), FetchError> {
    let token = json
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FetchError::Decode("token response has no access_token".to_string()))?;
    let expires_in = json.get("expires_in").and_then(Value::as_u64).unwrap_or(3600);
    Ok((token.to_string(), Duration::from_secs(expires_in)))
}

/// Largest album image of the first search hit.
pub fn artwork_url(json: &Value) -> Option<String> {
    json.pointer("/tracks/items/0/album/images/0/url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artwork_url_from_first_hit() {
        let json = json!({
            "tracks": {
                "items": [{
                    "name": "Windowlicker",
                    "album": {
                        "images": [
                            {"url": "https://i.scdn.co/image/640", "height": 640},
                            {"url": "https://i.scdn.co/image/300", "height": 300}
                        ]
                    }
                }]
            }
        });
        assert_eq!(artwork_url(&json).as_deref(), Some("https://i.scdn.co/image/640"));
    }

    #[test]
    fn test_artwork_url_missing() {
        assert_eq!(artwork_url(&json!({"tracks": {"items": []}})), None);
        assert_eq!(
            artwork_url(&json!({"tracks": {"items": [{"album": {"images": []}}]}})),
            None
        );
    }

    #[test]
    fn test_parse_token() {
        let (token, ttl) = parse_token(&json!({
            "access_token": "BQD",
            "token_type": "Bearer",
            "expires_in": 3600
        }))
        .unwrap();
        assert_eq!(token, "BQD");
        assert_eq!(ttl, Duration::from_secs(3600));

        assert!(matches!(
            parse_token(&json!({"error": "invalid_client"})),
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_pool_falls_back_to_default_artwork() {
        use crate::cache::MemoryStore;
        use crate::governor::GovernorConfig;

        let spotify = Spotify::new(
            ApiClient::new("test", Duration::from_secs(1)).unwrap(),
            Arc::new(KeyRotator::new(Vec::new())),
            RequestGovernor::new("spotify", GovernorConfig::default()),
            TieredCache::new(Arc::new(MemoryStore::new())),
            "https://example.com/default.png",
        );

        assert_eq!(
            spotify.track_artwork("Xtal", "Aphex Twin").await,
            "https://example.com/default.png"
        );
        assert_eq!(spotify.governor().stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_empty_pool_still_serves_cached_artwork() {
        use crate::cache::{DurableStore, MemoryStore};
        use crate::governor::GovernorConfig;

        let store = MemoryStore::new();
        let key = CacheKey::new(ARTWORK_KIND, "aphex twin").with_qualifier("xtal");
        store
            .set(&key.render(), "\"https://i.scdn.co/image/xtal\"")
            .await
            .unwrap();

        let spotify = Spotify::new(
            ApiClient::new("test", Duration::from_secs(1)).unwrap(),
            Arc::new(KeyRotator::new(Vec::new())),
            RequestGovernor::new("spotify", GovernorConfig::default()),
            TieredCache::new(Arc::new(store)),
            "https://example.com/default.png",
        );

        assert_eq!(
            spotify.track_artwork("Xtal", "Aphex Twin").await,
            "https://i.scdn.co/image/xtal"
        );
        assert_eq!(spotify.governor().stats().total_requests, 0);
    }
}
