//! Last.fm profile enrichment: what a user is playing and their top artists.
//!
//! Requests rotate across every configured API key and go through one
//! governor, so a burst of profile views cannot trip the per-key limit.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheKey, TieredCache};
use crate::credentials::{Credential, KeyRotator};
use crate::governor::{FetchError, GovernorError, RequestGovernor};
use crate::http_client::ApiClient;

pub const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Cache kind for a user's latest scrobble.
pub const RECENT_KIND: &str = "lastfm_recent";
/// Cache kind for a user's top artists, qualified by period and limit.
pub const TOP_ARTISTS_KIND: &str = "lastfm_top_artists";

/// Last.fm error code for "rate limit exceeded".
const RATE_LIMIT_ERROR_CODE: i64 = 29;

/// Time range for chart queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Period {
    #[default]
    #[serde(rename = "overall")]
    Overall,
    #[serde(rename = "7day")]
    SevenDay,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3month")]
    ThreeMonth,
    #[serde(rename = "6month")]
    SixMonth,
    #[serde(rename = "12month")]
    TwelveMonth,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Overall => "overall",
            Period::SevenDay => "7day",
            Period::OneMonth => "1month",
            Period::ThreeMonth => "3month",
            Period::SixMonth => "6month",
            Period::TwelveMonth => "12month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overall" => Ok(Period::Overall),
            "7day" | "week" => Ok(Period::SevenDay),
            "1month" | "month" => Ok(Period::OneMonth),
            "3month" => Ok(Period::ThreeMonth),
            "6month" => Ok(Period::SixMonth),
            "12month" | "year" => Ok(Period::TwelveMonth),
            other => Err(format!(
                "unknown period '{}' (expected overall, 7day, 1month, 3month, 6month or 12month)",
                other
            )),
        }
    }
}

/// Most recent (or currently playing) track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTrack {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub now_playing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopArtist {
    pub name: String,
    pub play_count: u64,
    pub url: Option<String>,
}

/// Last.fm client built on a key pool, a governor and the shared cache.
#[derive(Clone)]
pub struct LastFm {
    client: ApiClient,
    keys: Arc<KeyRotator>,
    governor: RequestGovernor<Value>,
    cache: TieredCache,
    base_url: String,
    recent_ttl: Duration,
    top_ttl: Duration,
}

impl LastFm {
    pub fn new(
        client: ApiClient,
        keys: Arc<KeyRotator>,
        governor: RequestGovernor<Value>,
        cache: TieredCache,
    ) -> Self {
        Self {
            client,
            keys,
            governor,
            cache,
            base_url: DEFAULT_BASE_URL.to_string(),
            recent_ttl: Duration::from_secs(30),
            top_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_ttls(mut self, recent_ttl: Duration, top_ttl: Duration) -> Self {
        self.recent_ttl = recent_ttl;
        self.top_ttl = top_ttl;
        self
    }

    pub fn keys(&self) -> &KeyRotator {
        &self.keys
    }

    pub fn governor(&self) -> &RequestGovernor<Value> {
        &self.governor
    }

    /// Latest scrobble for `user`.
    ///
    /// `Ok(None)` when the user has no scrobbles, or when no API key is
    /// configured and nothing is cached; callers render their placeholder
    /// in that case.
    pub async fn recent_track(&self, user: &str) -> Result<Option<RecentTrack>, GovernorError> {
        let key = CacheKey::new(RECENT_KIND, user.to_lowercase());
        if self.keys.is_empty() {
            warn!("No Last.fm API keys configured, serving recent track from cache only");
            return Ok(self.cache.cached::<Option<RecentTrack>>(&key).await.flatten());
        }

        let this = self.clone();
        let user = user.to_string();
        self.cache
            .get_or_fetch(&key, self.recent_ttl, move || async move {
                let json = this
                    .call(
                        "user.getrecenttracks",
                        vec![("user".to_string(), user), ("limit".to_string(), "1".to_string())],
                    )
                    .await?;
                Ok::<_, GovernorError>(parse_recent_track(&json)?)
            })
            .await
    }

    /// Top artists for `user` over `period`. Without an API key only cached
    /// results are returned, or an empty list.
    pub async fn top_artists(
        &self,
        user: &str,
        period: Period,
        limit: usize,
    ) -> Result<Vec<TopArtist>, GovernorError> {
        let key = CacheKey::new(TOP_ARTISTS_KIND, user.to_lowercase())
            .with_qualifier(period.as_str())
            .with_qualifier(limit.to_string());
        if self.keys.is_empty() {
            warn!("No Last.fm API keys configured, serving top artists from cache only");
            return Ok(self.cache.cached(&key).await.unwrap_or_default());
        }

        let this = self.clone();
        let user = user.to_string();
        self.cache
            .get_or_fetch(&key, self.top_ttl, move || async move {
                let json = this
                    .call(
                        "user.gettopartists",
                        vec![
                            ("user".to_string(), user),
                            ("period".to_string(), period.as_str().to_string()),
                            ("limit".to_string(), limit.to_string()),
                        ],
                    )
                    .await?;
                Ok::<_, GovernorError>(parse_top_artists(&json)?)
            })
            .await
    }

    /// Drop every cached Last.fm response for `user`.
    pub async fn invalidate_user(&self, user: &str) -> usize {
        let user = user.to_lowercase();
        self.cache.clear_resource(RECENT_KIND, &user).await
            + self.cache.clear_resource(TOP_ARTISTS_KIND, &user).await
    }

    /// One governed API call. Each attempt takes the next key in rotation.
    async fn call(
        &self,
        method: &'static str,
        params: Vec<(String, String)>,
    ) -> Result<Value, GovernorError> {
        let client = self.client.clone();
        let keys = Arc::clone(&self.keys);
        let base_url = self.base_url.clone();

        self.governor
            .enqueue(move || {
                let client = client.clone();
                let credential = keys.next();
                let base_url = base_url.clone();
                let params = params.clone();
                async move {
                    let api_key = match &credential {
                        Some(Credential::ApiKey(key)) => key.clone(),
                        _ => {
                            return Err(FetchError::Remote {
                                status: 401,
                                message: "no Last.fm API key available".to_string(),
                            })
                        }
                    };
                    if let Some(credential) = &credential {
                        debug!("Last.fm {} using key {}", method, credential.masked());
                    }

                    let mut query: Vec<(&str, &str)> = vec![
                        ("method", method),
                        ("api_key", api_key.as_str()),
                        ("format", "json"),
                    ];
                    query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

                    let json = client.get_json(&base_url, &query, None).await?;
                    match api_error(&json) {
                        Some(e) => Err(e),
                        None => Ok(json),
                    }
                }
            })
            .await
    }
}

/// Last.fm sometimes reports failures in the body of a 200 response.
pub fn api_error(json: &Value) -> Option<FetchError> {
    let code = json.get("error")?.as_i64()?;
    if code == RATE_LIMIT_ERROR_CODE {
        return Some(FetchError::RateLimited { retry_after: None });
    }
    let message = json
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown Last.fm error")
        .to_string();
    Some(FetchError::Remote {
        status: 200,
        message: format!("Last.fm error {}: {}", code, message),
    })
}

#[derive(Deserialize)]
struct TextField {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Deserialize)]
struct RawImage {
    #[serde(rename = "#text", default)]
    url: String,
}

#[derive(Deserialize)]
struct RawTrack {
    name: String,
    artist: TextField,
    album: Option<TextField>,
    #[serde(default)]
    image: Vec<RawImage>,
    url: Option<String>,
    #[serde(rename = "@attr")]
    attr: Option<Value>,
}

/// First track of a `user.getrecenttracks` reply.
pub fn parse_recent_track(json: &Value) -> Result<Option<RecentTrack>, FetchError> {
    let tracks = json
        .pointer("/recenttracks/track")
        .ok_or_else(|| FetchError::Decode("missing recenttracks.track".to_string()))?;

    // A single track comes back as an object instead of a one-element array.
    let first = match tracks {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(tracks),
        _ => None,
    };
    let Some(first) = first else {
        return Ok(None);
    };

    let raw: RawTrack = serde_json::from_value(first.clone())?;
    let now_playing = raw
        .attr
        .as_ref()
        .and_then(|a| a.get("nowplaying"))
        .and_then(Value::as_str)
        == Some("true");
    // Sizes are listed smallest first.
    let image_url = raw
        .image
        .iter()
        .rev()
        .map(|i| i.url.trim())
        .find(|u| !u.is_empty())
        .map(str::to_string);

    Ok(Some(RecentTrack {
        name: raw.name,
        artist: raw.artist.text,
        album: raw.album.map(|a| a.text).filter(|a| !a.is_empty()),
        image_url,
        url: raw.url.filter(|u| !u.is_empty()),
        now_playing,
    }))
}

#[derive(Deserialize)]
struct RawArtist {
    name: String,
    #[serde(default)]
    playcount: Value,
    url: Option<String>,
}

/// Artists of a `user.gettopartists` reply, in chart order.
pub fn parse_top_artists(json: &Value) -> Result<Vec<TopArtist>, FetchError> {
    let artists = json
        .pointer("/topartists/artist")
        .ok_or_else(|| FetchError::Decode("missing topartists.artist".to_string()))?;

    let items: Vec<Value> = match artists {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![artists.clone()],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            let raw: RawArtist = serde_json::from_value(item)?;
            let play_count = match &raw.playcount {
                Value::String(s) => s.parse().unwrap_or(0),
                Value::Number(n) => n.as_u64().unwrap_or(0),
                _ => 0,
            };
            Ok(TopArtist {
                name: raw.name,
                play_count,
                url: raw.url,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_now_playing_track() {
        let json = json!({
            "recenttracks": {
                "track": [{
                    "artist": {"mbid": "", "#text": "Boards of Canada"},
                    "name": "Roygbiv",
                    "album": {"#text": "Music Has the Right to Children"},
                    "image": [
                        {"size": "small", "#text": "https://img/s.png"},
                        {"size": "extralarge", "#text": "https://img/xl.png"}
                    ],
                    "url": "https://www.last.fm/music/Boards+of+Canada/_/Roygbiv",
                    "@attr": {"nowplaying": "true"}
                }, {
                    "artist": {"#text": "Older"},
                    "name": "Previous"
                }]
            }
        });

        let track = parse_recent_track(&json).unwrap().unwrap();
        assert_eq!(track.name, "Roygbiv");
        assert_eq!(track.artist, "Boards of Canada");
        assert_eq!(track.album.as_deref(), Some("Music Has the Right to Children"));
        assert_eq!(track.image_url.as_deref(), Some("https://img/xl.png"));
        assert!(track.now_playing);
    }

    #[test]
    fn test_parse_single_object_and_empty_images() {
        let json = json!({
            "recenttracks": {
                "track": {
                    "artist": {"#text": "Burial"},
                    "name": "Archangel",
                    "album": {"#text": ""},
                    "image": [{"size": "small", "#text": ""}]
                }
            }
        });
        let track = parse_recent_track(&json).unwrap().unwrap();
        assert_eq!(track.artist, "Burial");
        assert_eq!(track.album, None);
        assert_eq!(track.image_url, None);
        assert!(!track.now_playing);
    }

    #[test]
    fn test_parse_no_scrobbles() {
        let json = json!({"recenttracks": {"track": []}});
        assert_eq!(parse_recent_track(&json).unwrap(), None);
        assert!(matches!(
            parse_recent_track(&json!({})),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_top_artists() {
        let json = json!({
            "topartists": {
                "artist": [
                    {"name": "Aphex Twin", "playcount": "412", "url": "https://www.last.fm/music/Aphex+Twin"},
                    {"name": "Autechre", "playcount": 97}
                ]
            }
        });
        let artists = parse_top_artists(&json).unwrap();
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].play_count, 412);
        assert_eq!(artists[1].play_count, 97);
        assert_eq!(artists[1].url, None);
    }

    #[test]
    fn test_api_error_codes() {
        assert_eq!(
            api_error(&json!({"error": 29, "message": "Rate Limit Exceeded"})),
            Some(FetchError::RateLimited { retry_after: None })
        );
        assert!(matches!(
            api_error(&json!({"error": 6, "message": "User not found"})),
            Some(FetchError::Remote { message, .. }) if message.contains("User not found")
        ));
        assert_eq!(api_error(&json!({"recenttracks": {}})), None);
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("7day".parse::<Period>().unwrap(), Period::SevenDay);
        assert_eq!("YEAR".parse::<Period>().unwrap(), Period::TwelveMonth);
        assert!("fortnight".parse::<Period>().is_err());
        assert_eq!(Period::default().to_string(), "overall");
    }

    #[tokio::test]
    async fn test_no_keys_serves_cache_only() {
        use crate::cache::MemoryStore;
        use crate::governor::GovernorConfig;

        let cache = TieredCache::new(Arc::new(MemoryStore::new()));
        let lastfm = LastFm::new(
            ApiClient::new("test", Duration::from_secs(1)).unwrap(),
            Arc::new(KeyRotator::new(Vec::new())),
            RequestGovernor::new("lastfm", GovernorConfig::default()),
            cache.clone(),
        );
        let cached = vec![TopArtist {
            name: "Actress".to_string(),
            play_count: 12,
            url: None,
        }];
        let key = CacheKey::new(TOP_ARTISTS_KIND, "kim")
            .with_qualifier(Period::SevenDay.as_str())
            .with_qualifier("5");
        cache.set(&key, &cached, Duration::from_secs(60)).await;

        assert_eq!(lastfm.top_artists("Kim", Period::SevenDay, 5).await.unwrap(), cached);
        assert_eq!(lastfm.top_artists("Kim", Period::Overall, 5).await.unwrap(), Vec::new());
        assert_eq!(lastfm.recent_track("kim").await.unwrap(), None);
        assert_eq!(lastfm.governor().stats().total_requests, 0);
    }
}
