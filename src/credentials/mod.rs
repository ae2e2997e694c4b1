//! Credentials for third-party APIs and round-robin rotation between them.
//!
//! Several keys for the same service are configured as numbered slots
//! (`LASTFM_API_KEY`, `LASTFM_API_KEY_1`, ...) and handed out in turn so
//! no single key absorbs the whole request volume.

mod rotator;
mod slots;

pub use rotator::KeyRotator;
pub use slots::{api_keys_from, client_pairs_from, slot_names, SlotConfig, DEFAULT_SLOTS};

use std::fmt;

/// One way of authenticating against a third-party API.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// Opaque API key (Last.fm style).
    ApiKey(String),
    /// Client id and secret (OAuth client-credentials style).
    ClientPair {
        client_id: String,
        client_secret: String,
    },
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Credential::ApiKey(key.into())
    }

    pub fn client_pair(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Credential::ClientPair {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Whether every part of the credential is non-blank.
    pub fn is_usable(&self) -> bool {
        match self {
            Credential::ApiKey(key) => !key.trim().is_empty(),
            Credential::ClientPair {
                client_id,
                client_secret,
            } => !client_id.trim().is_empty() && !client_secret.trim().is_empty(),
        }
    }

    /// Public identifier: the client id for pairs, the key itself otherwise.
    pub fn identity(&self) -> &str {
        match self {
            Credential::ApiKey(key) => key,
            Credential::ClientPair { client_id, .. } => client_id,
        }
    }

    /// Short form safe for logs and terminal output.
    pub fn masked(&self) -> String {
        match self {
            Credential::ApiKey(key) => mask(key),
            Credential::ClientPair { client_id, .. } => format!("{} (client id)", mask(client_id)),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.debug_tuple("ApiKey").field(&self.masked()).finish(),
            Credential::ClientPair { client_id, .. } => f
                .debug_struct("ClientPair")
                .field("client_id", &mask(client_id))
                .field("client_secret", &"***")
                .finish(),
        }
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_credentials_are_unusable() {
        assert!(!Credential::api_key("").is_usable());
        assert!(!Credential::api_key("   ").is_usable());
        assert!(!Credential::client_pair("id", "").is_usable());
        assert!(!Credential::client_pair("", "secret").is_usable());
        assert!(Credential::client_pair("id", "secret").is_usable());
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let pair = Credential::client_pair("abcdef123", "topsecretvalue");
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains("topsecretvalue"));
        assert!(!rendered.contains("abcdef123"));
        assert!(rendered.contains("abcd****"));

        let key = Credential::api_key("0123456789abcdef");
        assert!(!format!("{:?}", key).contains("0123456789abcdef"));
        assert_eq!(Credential::api_key("abc").masked(), "****");
    }

    #[test]
    fn test_identity() {
        assert_eq!(Credential::api_key("k1").identity(), "k1");
        assert_eq!(Credential::client_pair("cid", "s").identity(), "cid");
    }
}
