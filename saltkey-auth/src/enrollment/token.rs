//! Install token types.
//!
//! An install token is a short-lived, single-use bearer secret that lets a
//! minion without the enrollment secret pull the master public key once.
//! Only the SHA-256 hash of a token is kept as a lookup key; the record
//! remembers an 8-character prefix for display.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::Duration;

use super::TokenError;

/// Random bytes per token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Shortest accepted token lifetime.
pub const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);

/// Longest accepted token lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Characters of the token kept for display.
const PREFIX_LEN: usize = 8;

/// Stored state of an install token.
///
/// Never holds the token value itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallToken {
    prefix: String,
    minion_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used: bool,
    used_at: Option<DateTime<Utc>>,
    bound_ip: Option<IpAddr>,
}

impl InstallToken {
    pub(crate) fn new(
        token: &str,
        minion_id: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        bound_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            prefix: token.chars().take(PREFIX_LEN).collect(),
            minion_id,
            created_at,
            expires_at,
            used: false,
            used_at: None,
            bound_ip,
        }
    }

    /// Minion the token was issued for.
    #[must_use]
    pub fn minion_id(&self) -> &str {
        &self.minion_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token has been redeemed. Terminal once true.
    #[must_use]
    pub fn used(&self) -> bool {
        self.used
    }

    #[must_use]
    pub fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used_at
    }

    /// Address the token is pinned to, if any.
    #[must_use]
    pub fn bound_ip(&self) -> Option<IpAddr> {
        self.bound_ip
    }

    /// Display form, `<8-char prefix>...`.
    #[must_use]
    pub fn masked(&self) -> String {
        format!("{}...", self.prefix)
    }

    /// Expired when `now` is strictly past `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether `client_ip` satisfies the pin. Unpinned tokens match anything.
    #[must_use]
    pub fn ip_matches(&self, client_ip: Option<IpAddr>) -> bool {
        match self.bound_ip {
            None => true,
            Some(bound) => client_ip == Some(bound),
        }
    }

    pub(crate) fn mark_used(&mut self, now: DateTime<Utc>, client_ip: Option<IpAddr>) {
        self.used = true;
        self.used_at = Some(now);
        if self.bound_ip.is_none() {
            self.bound_ip = client_ip;
        }
    }
}

/// A freshly issued token. The only place the token value is returned.
#[derive(Clone)]
pub struct IssuedToken {
    /// Lowercase hex token value, 64 characters.
    pub token: String,
    pub record: InstallToken,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &self.record.masked())
            .field("record", &self.record)
            .finish()
    }
}

/// Mask a token for logs and listings.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(PREFIX_LEN).collect();
    format!("{prefix}...")
}

/// Clamp a requested lifetime to `[MIN_TOKEN_TTL, MAX_TOKEN_TTL]`.
#[must_use]
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_TOKEN_TTL, MAX_TOKEN_TTL)
}

/// Lookup key for a token value.
pub(crate) fn hash_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.trim().as_bytes()).into()
}

/// Generate a token value from the OS CSPRNG.
pub(crate) fn generate_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| TokenError::RandomSourceExhausted)?;
    Ok(hex::encode(bytes))
}
