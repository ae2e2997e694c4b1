//! Round-robin credential pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::Credential;

/// Hands out configured credentials in turn.
///
/// Blank slots are dropped at construction and the remaining order is the
/// configuration order. The cursor lives in an atomic so a shared pool stays
/// consistent across tokio worker threads.
#[derive(Debug)]
pub struct KeyRotator {
    keys: Vec<Credential>,
    index: AtomicUsize,
}

impl KeyRotator {
    /// Build a pool from configured slots, skipping unset and blank ones.
    pub fn new<I>(configured: I) -> Self
    where
        I: IntoIterator<Item = Option<Credential>>,
    {
        let keys: Vec<Credential> = configured
            .into_iter()
            .flatten()
            .filter(Credential::is_usable)
            .collect();
        debug!("Credential pool loaded with {} usable keys", keys.len());
        Self {
            keys,
            index: AtomicUsize::new(0),
        }
    }

    /// The usable credentials in configuration order.
    pub fn valid_keys(&self) -> &[Credential] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next credential in rotation, or `None` for an empty pool.
    pub fn next(&self) -> Option<Credential> {
        let start = self.advance(1)?;
        Some(self.keys[start].clone())
    }

    /// `count` credentials starting at the cursor (wrapping), advancing the
    /// cursor by `count`.
    pub fn next_batch(&self, count: usize) -> Vec<Credential> {
        if count == 0 {
            return Vec::new();
        }
        let Some(start) = self.advance(count) else {
            return Vec::new();
        };
        let len = self.keys.len();
        (0..count)
            .map(|offset| self.keys[(start + offset) % len].clone())
            .collect()
    }

    /// Move the cursor forward by `step`, returning where it was.
    fn advance(&self, step: usize) -> Option<usize> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }
        let step = step % len;
        let previous = self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + step) % len))
            .unwrap_or_else(|i| i);
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keys(names: &[&str]) -> Vec<Option<Credential>> {
        names
            .iter()
            .map(|n| Some(Credential::api_key(*n)))
            .collect()
    }

    #[test]
    fn test_round_robin_visits_each_key_once() {
        let pool = KeyRotator::new(keys(&["k1", "k2", "k3"]));
        let first_pass: Vec<_> = (0..3).map(|_| pool.next().unwrap()).collect();
        assert_eq!(
            first_pass,
            vec![
                Credential::api_key("k1"),
                Credential::api_key("k2"),
                Credential::api_key("k3")
            ]
        );
        assert_eq!(pool.next(), Some(Credential::api_key("k1")));
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let pool = KeyRotator::new(vec![None, Some(Credential::api_key("")), None]);
        assert!(pool.is_empty());
        assert_eq!(pool.next(), None);
        assert_eq!(pool.next(), None);
        assert!(pool.next_batch(3).is_empty());
    }

    #[test]
    fn test_filters_blank_slots_preserving_order() {
        let pool = KeyRotator::new(vec![
            Some(Credential::api_key("a")),
            None,
            Some(Credential::api_key("  ")),
            Some(Credential::api_key("b")),
        ]);
        assert_eq!(
            pool.valid_keys(),
            &[Credential::api_key("a"), Credential::api_key("b")]
        );
    }

    #[test]
    fn test_next_batch_wraps_and_advances() {
        let pool = KeyRotator::new(keys(&["k1", "k2", "k3"]));
        pool.next();

        let batch = pool.next_batch(4);
        assert_eq!(
            batch,
            vec![
                Credential::api_key("k2"),
                Credential::api_key("k3"),
                Credential::api_key("k1"),
                Credential::api_key("k2")
            ]
        );
        // Cursor moved by 4 from index 1: (1 + 4) % 3 == 2.
        assert_eq!(pool.next(), Some(Credential::api_key("k3")));
        assert!(pool.next_batch(0).is_empty());
    }

    #[test]
    fn test_concurrent_rotation_is_balanced() {
        let pool = Arc::new(KeyRotator::new(keys(&["k1", "k2"])));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..500)
                        .filter(|_| pool.next() == Some(Credential::api_key("k1")))
                        .count()
                })
            })
            .collect();
        let k1_total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(k1_total, 1000);
    }
}
