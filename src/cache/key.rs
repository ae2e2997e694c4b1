//! Composite cache keys.

use std::fmt;

/// Separator between key components. Never appears inside an encoded
/// component, so rendering is injective.
const SEPARATOR: char = ':';

/// Key for a cached resource: a type tag, an id, and optional qualifiers
/// such as a time period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: String,
    id: String,
    qualifiers: Vec<String>,
}

impl CacheKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            qualifiers: Vec::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifiers.push(qualifier.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// String form used by every cache tier.
    pub fn render(&self) -> String {
        let mut out = resource_prefix(&self.kind, &self.id);
        for qualifier in &self.qualifiers {
            out.push(SEPARATOR);
            out.push_str(&urlencoding::encode(qualifier));
        }
        out
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Rendered prefix shared by every key of one logical resource.
pub fn resource_prefix(kind: &str, id: &str) -> String {
    format!(
        "{}{}{}",
        urlencoding::encode(kind),
        SEPARATOR,
        urlencoding::encode(id)
    )
}

/// Whether a rendered key (or a marker derived from it by appending a
/// non-alphanumeric suffix) belongs to the resource with the given prefix.
pub fn belongs_to_resource(rendered: &str, prefix: &str) -> bool {
    match rendered.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR) || rest.starts_with('#'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let a = CacheKey::new("lastfm_top_artists", "alice").with_qualifier("7day");
        let b = CacheKey::new("lastfm_top_artists", "alice").with_qualifier("7day");
        assert_eq!(a.render(), b.render());
        assert_eq!(a.render(), "lastfm_top_artists:alice:7day");
    }

    #[test]
    fn test_distinct_tuples_never_collide() {
        let keys = [
            CacheKey::new("a", "b"),
            CacheKey::new("a", "b").with_qualifier("c"),
            CacheKey::new("a", "b:c"),
            CacheKey::new("a:b", "c"),
            CacheKey::new("a", "b").with_qualifier(""),
            CacheKey::new("a", "b").with_qualifier("c").with_qualifier("d"),
            CacheKey::new("a", "b").with_qualifier("c:d"),
            CacheKey::new("b", "a"),
            CacheKey::new("a", "b#ts"),
        ];
        for (i, x) in keys.iter().enumerate() {
            for (j, y) in keys.iter().enumerate() {
                if i != j {
                    assert_ne!(x.render(), y.render(), "{:?} vs {:?}", x, y);
                }
            }
        }
    }

    #[test]
    fn test_resource_membership() {
        let prefix = resource_prefix("profile", "bob");
        assert!(belongs_to_resource(&CacheKey::new("profile", "bob").render(), &prefix));
        assert!(belongs_to_resource(
            &CacheKey::new("profile", "bob").with_qualifier("links").render(),
            &prefix
        ));
        assert!(belongs_to_resource("profile:bob#ts", &prefix));
        assert!(!belongs_to_resource(&CacheKey::new("profile", "bobby").render(), &prefix));
        assert!(!belongs_to_resource(&CacheKey::new("profiles", "bob").render(), &prefix));
    }
}
