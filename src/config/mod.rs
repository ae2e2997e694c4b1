//! Configuration loading using the prefer crate for file discovery.
//!
//! Looks for `biolink.{toml,yaml,yml,json}` in the usual locations, parses
//! it with serde, then applies environment overrides. Every section is
//! optional.

mod settings;

pub use settings::{Settings, StoreBackend, CACHE_FILENAME};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::DEFAULT_FRESHNESS;
use crate::credentials::SlotConfig;
use crate::governor::{get_delay_from_env, GovernorConfig};
use crate::http_client::USER_AGENT;
use crate::integrations::{lastfm, spotify};

/// Name prefer searches for.
pub const CONFIG_NAME: &str = "biolink";

/// Environment variable overriding every governor's base delay.
pub const BASE_DELAY_ENV: &str = "BIOLINK_BASE_DELAY_MS";
/// Environment variable overriding every governor's delay ceiling.
pub const MAX_DELAY_ENV: &str = "BIOLINK_MAX_DELAY_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error("Unknown cache store '{0}' (expected memory, file or a redis:// URL)")]
    UnknownStore(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `memory`, `file`, or a `redis://` URL.
    pub store: String,
    /// Cache file for the `file` store. Relative paths resolve against the
    /// config file's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Base data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Age after which a persisted value is refreshed in the background.
    pub freshness_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store: "file".to_string(),
            path: None,
            data_dir: None,
            freshness_secs: DEFAULT_FRESHNESS.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub keys: SlotConfig,
    pub base_url: String,
    pub recent_ttl_secs: u64,
    pub top_artists_ttl_secs: u64,
    /// Overrides the top-level `[governor]` section for Last.fm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governor: Option<GovernorConfig>,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            keys: SlotConfig::api_keys("LASTFM_API_KEY"),
            base_url: lastfm::DEFAULT_BASE_URL.to_string(),
            recent_ttl_secs: 30,
            top_artists_ttl_secs: 3600,
            governor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub credentials: SlotConfig,
    pub token_url: String,
    pub search_url: String,
    /// Returned whenever no artwork can be found.
    pub default_artwork: String,
    pub artwork_ttl_secs: u64,
    /// Overrides the top-level `[governor]` section for Spotify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governor: Option<GovernorConfig>,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            credentials: SlotConfig::client_pairs("SPOTIFY_CLIENT_ID", "SPOTIFY_CLIENT_SECRET"),
            token_url: spotify::DEFAULT_TOKEN_URL.to_string(),
            search_url: spotify::DEFAULT_SEARCH_URL.to_string(),
            default_artwork: "https://lastfm.freetls.fastly.net/i/u/300x300/2a96cbd8b46e442fc41c2b86b821562f.png"
                .to_string(),
            artwork_ttl_secs: 24 * 3600,
            governor: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults shared by every governor.
    pub governor: GovernorConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub lastfm: LastFmConfig,
    pub spotify: SpotifyConfig,
    /// File this config was read from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load the config file, falling back to defaults.
    ///
    /// A file that exists but fails to parse is an error rather than being
    /// silently replaced by defaults.
    pub async fn load() -> Result<Self, ConfigError> {
        let discovered = match prefer::load(CONFIG_NAME).await {
            Ok(pref_config) => pref_config.source_path().map(|p| p.to_path_buf()),
            Err(e) => {
                tracing::debug!("No config file found: {}", e);
                None
            }
        };

        match discovered {
            Some(path) => Self::load_from_path(&path).await,
            None => Ok(Self::default().with_env_overrides()),
        }
    }

    /// Load a specific file. The format follows the extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(path, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        match ext {
            "toml" => toml::from_str(contents).map_err(|e| parse_error("TOML", e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).map_err(|e| parse_error("YAML", e.to_string()))
            }
            _ => serde_json::from_str(contents).map_err(|e| parse_error("JSON", e.to_string())),
        }
    }

    /// Apply `BIOLINK_BASE_DELAY_MS` / `BIOLINK_MAX_DELAY_MS` to every
    /// governor section.
    pub fn with_env_overrides(mut self) -> Self {
        apply_delay_env(&mut self.governor);
        if let Some(governor) = self.lastfm.governor.as_mut() {
            apply_delay_env(governor);
        }
        if let Some(governor) = self.spotify.governor.as_mut() {
            apply_delay_env(governor);
        }
        self
    }

    pub fn lastfm_governor(&self) -> GovernorConfig {
        self.lastfm.governor.clone().unwrap_or_else(|| self.governor.clone())
    }

    pub fn spotify_governor(&self) -> GovernorConfig {
        self.spotify.governor.clone().unwrap_or_else(|| self.governor.clone())
    }

    /// Directory relative paths resolve against: the config file's parent,
    /// or the current directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// `~` is expanded.
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Runtime settings derived from this config.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.cache.data_dir {
            Some(dir) => Settings::with_data_dir(self.resolve_path(dir)),
            None => Settings::default(),
        };
        if let Some(path) = &self.cache.path {
            settings.cache_path = self.resolve_path(path);
        }
        settings.store = StoreBackend::parse(&self.cache.store, &settings.cache_path)
            .ok_or_else(|| ConfigError::UnknownStore(self.cache.store.clone()))?;
        Ok(settings)
    }

    /// Serialize for display, in the format of the source file.
    pub fn to_pretty_string(&self) -> String {
        let ext = self
            .source_path
            .as_ref()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .unwrap_or("toml");
        let rendered = match ext {
            "yaml" | "yml" => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            "json" => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            _ => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        };
        rendered.unwrap_or_else(|e| format!("# failed to render config: {}", e))
    }
}

fn apply_delay_env(governor: &mut GovernorConfig) {
    governor.base_delay =
        get_delay_from_env(BASE_DELAY_ENV, governor.base_delay.as_millis() as u64);
    governor.max_delay = get_delay_from_env(MAX_DELAY_ENV, governor.max_delay.as_millis() as u64);
}
