//! In-memory install token registry.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::token::{clamp_ttl, generate_token, hash_token, InstallToken, IssuedToken};
use super::TokenError;
use crate::clock::Clock;

/// Registry of one-time install tokens.
///
/// # Security Properties
///
/// - Tokens are looked up by SHA-256 hash; values are never stored
/// - `consume` flips `used` under the per-entry lock, so exactly one caller wins
/// - IP pinning is enforced only when `enforce_ip` is set
pub struct TokenStore {
    tokens: DashMap<[u8; 32], InstallToken>,
    clock: Arc<dyn Clock>,
    enforce_ip: bool,
}

impl TokenStore {
    pub fn new(clock: Arc<dyn Clock>, enforce_ip: bool) -> Self {
        Self {
            tokens: DashMap::new(),
            clock,
            enforce_ip,
        }
    }

    /// Whether a pinned token rejects other addresses.
    pub fn enforces_ip(&self) -> bool {
        self.enforce_ip
    }

    /// Issue a token for `minion_id`, valid for `ttl` (clamped to 1s..24h).
    ///
    /// # Errors
    ///
    /// Returns `TokenError::RandomSourceExhausted` if the OS RNG fails.
    pub fn issue(
        &self,
        minion_id: &str,
        ttl: Duration,
        bound_ip: Option<IpAddr>,
    ) -> Result<IssuedToken, TokenError> {
        let token = generate_token()?;
        let ttl = clamp_ttl(ttl);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        let created_at = self.clock.now();
        let expires_at = created_at + chrono::Duration::seconds(ttl_secs);
        let record = InstallToken::new(
            &token,
            minion_id.to_string(),
            created_at,
            expires_at,
            bound_ip,
        );

        match self.tokens.entry(hash_token(&token)) {
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
            }
            // A repeated 256-bit value means the RNG is not producing entropy
            Entry::Occupied(_) => return Err(TokenError::RandomSourceExhausted),
        }

        Ok(IssuedToken { token, record })
    }

    /// Look up a token without checking it.
    pub fn get(&self, token: &str) -> Option<InstallToken> {
        self.tokens
            .get(&hash_token(token))
            .map(|record| record.value().clone())
    }

    /// Check that `token` is redeemable by `client_ip` without changing it.
    ///
    /// Checks run in order: existence, expiry, prior use, then the IP pin
    /// when enforced.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn validate(
        &self,
        token: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<InstallToken, TokenError> {
        let record = self
            .tokens
            .get(&hash_token(token))
            .ok_or(TokenError::TokenNotFound)?;
        self.check(&record, self.clock.now(), client_ip)?;
        Ok(record.value().clone())
    }

    /// Redeem `token`, marking it used.
    ///
    /// All checks from [`validate`](Self::validate) are repeated while the
    /// entry is locked, so of several concurrent callers exactly one succeeds
    /// and the rest see `TokenAlreadyUsed`. An unpinned token becomes pinned
    /// to `client_ip`.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate).
    pub fn consume(
        &self,
        token: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<InstallToken, TokenError> {
        let key = hash_token(token);
        let now = self.clock.now();

        let mut record = self.tokens.get_mut(&key).ok_or(TokenError::TokenNotFound)?;
        self.check(&record, now, client_ip)?;
        record.mark_used(now, client_ip);
        Ok(record.value().clone())
    }

    /// Delete a token. Returns `false` if it did not exist.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(&hash_token(token)).is_some()
    }

    /// All live tokens, newest first.
    ///
    /// Expired tokens that were never used are dropped before listing.
    pub fn list(&self) -> Vec<InstallToken> {
        let now = self.clock.now();
        self.remove_where(|record| record.is_expired_at(now) && !record.used());

        let mut tokens: Vec<InstallToken> = self
            .tokens
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tokens.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        tokens
    }

    /// Remove every token whose expiry has passed, used or not.
    ///
    /// Returns the number removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.remove_where(|record| record.is_expired_at(now))
    }

    /// Number of tracked tokens, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn check(
        &self,
        record: &InstallToken,
        now: DateTime<Utc>,
        client_ip: Option<IpAddr>,
    ) -> Result<(), TokenError> {
        if record.is_expired_at(now) {
            return Err(TokenError::TokenExpired);
        }
        if record.used() {
            return Err(TokenError::TokenAlreadyUsed);
        }
        if self.enforce_ip && !record.ip_matches(client_ip) {
            return Err(TokenError::IpMismatch);
        }
        Ok(())
    }

    /// Snapshot matching keys, then remove each one whose record still matches.
    fn remove_where(&self, predicate: impl Fn(&InstallToken) -> bool) -> usize {
        let doomed: Vec<[u8; 32]> = self
            .tokens
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        doomed
            .iter()
            .filter(|key| {
                self.tokens
                    .remove_if(*key, |_, record| predicate(record))
                    .is_some()
            })
            .count()
    }
}
