//! Replay cache for signed enrollment requests.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use super::error::AuthnError;
use super::verify::ReplayCache;

/// TTL replay cache keyed by `(minion_id, nonce)`.
///
/// # Security Properties
///
/// - Rejects a nonce reused by the same minion within `2 * W`
/// - Atomic check-and-record via the DashMap entry API
/// - Memory-bounded via `max_entries`; at capacity only expired entries are
///   dropped, and new pairs are refused until room frees up
///
/// # Usage
///
/// ```
/// use saltkey_auth::authn::{AuthnError, NonceCache};
/// use std::time::Duration;
///
/// let cache = NonceCache::new(Duration::from_secs(300), 100_000);
/// assert!(cache.check_and_record("minion-01", "abc", 1_700_000_000).is_ok());
/// assert_eq!(
///     cache.check_and_record("minion-01", "abc", 1_700_000_001),
///     Err(AuthnError::ReplayedNonce)
/// );
/// ```
pub struct NonceCache {
    /// `minion_id \0 nonce` -> unix seconds when first accepted
    entries: DashMap<String, i64>,
    /// Entries older than this are expired (2 * freshness window)
    retention_secs: i64,
    max_entries: usize,
}

impl NonceCache {
    /// Create a cache for the given freshness window.
    ///
    /// Entries are retained for twice the window so a request signed at the
    /// far edge of the window cannot be replayed from the other edge.
    ///
    /// A `max_entries` of 0 disables the capacity bound.
    pub fn new(freshness_window: Duration, max_entries: usize) -> Self {
        let window = i64::try_from(freshness_window.as_secs()).unwrap_or(i64::MAX / 2);
        Self {
            entries: DashMap::with_capacity(max_entries.min(4096)),
            retention_secs: window.saturating_mul(2),
            max_entries,
        }
    }

    /// Retention period in seconds.
    pub fn retention_secs(&self) -> i64 {
        self.retention_secs
    }

    /// Whether the pair was accepted within the retention window.
    pub fn seen(&self, minion_id: &str, nonce: &str, now: i64) -> bool {
        self.entries
            .get(&cache_key(minion_id, nonce))
            .is_some_and(|seen_at| !self.is_expired(*seen_at, now))
    }

    /// Record the pair as seen at `now`, unconditionally.
    ///
    /// Bypasses the capacity bound.
    pub fn record(&self, minion_id: &str, nonce: &str, now: i64) {
        self.entries.insert(cache_key(minion_id, nonce), now);
    }

    /// Record the pair if it is new (or its previous sighting expired).
    ///
    /// # Errors
    ///
    /// `ReplayedNonce` if the pair is still live, `ReplayCacheFull` if the
    /// cache is at capacity with nothing expired to drop.
    pub fn check_and_record(&self, minion_id: &str, nonce: &str, now: i64) -> Result<(), AuthnError> {
        let key = cache_key(minion_id, nonce);

        // Capacity is settled before taking the entry guard, since the sweep
        // touches every shard.
        if self.at_capacity() && !self.entries.contains_key(&key) {
            self.sweep(now);
            if self.at_capacity() {
                return Err(AuthnError::ReplayCacheFull);
            }
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if self.is_expired(*entry.get(), now) {
                    entry.insert(now);
                    Ok(())
                } else {
                    Err(AuthnError::ReplayedNonce)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(())
            }
        }
    }

    /// Remove expired entries. Returns the number removed.
    ///
    /// Expired keys are collected first and then removed one by one, so no
    /// shard stays locked for the whole scan.
    pub fn sweep(&self, now: i64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| self.is_expired(*entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(*key, |_, seen_at| self.is_expired(*seen_at, now))
                    .is_some()
            })
            .count()
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, seen_at: i64, now: i64) -> bool {
        now.saturating_sub(seen_at) > self.retention_secs
    }

    fn at_capacity(&self) -> bool {
        self.max_entries != 0 && self.entries.len() >= self.max_entries
    }
}

impl ReplayCache for NonceCache {
    fn check_and_record(&self, minion_id: &str, nonce: &str, now: i64) -> Result<(), AuthnError> {
        NonceCache::check_and_record(self, minion_id, nonce, now)
    }
}

fn cache_key(minion_id: &str, nonce: &str) -> String {
    let mut key = String::with_capacity(minion_id.len() + nonce.len() + 1);
    key.push_str(minion_id);
    key.push('\0');
    key.push_str(nonce);
    key
}
