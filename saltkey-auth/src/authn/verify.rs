//! Signed enrollment request verification.

use hmac::Mac;
use std::sync::Arc;
use std::time::Duration;

use super::error::AuthnError;
use super::nonce_cache::NonceCache;
use super::request::{build_canonical_message, new_mac, EnrollmentRequest};
use super::secret::SecretStore;
use crate::clock::Clock;

/// Trait for replay detection.
///
/// # Atomicity
///
/// `check_and_record` **MUST be atomic**: the check and the insert happen as
/// one logical operation, so two concurrent requests carrying the same nonce
/// cannot both pass.
///
/// # Retention
///
/// Entries should be retained for at least twice the freshness window.
pub trait ReplayCache: Send + Sync {
    /// Record the pair if it is new.
    ///
    /// # Errors
    ///
    /// `ReplayedNonce` on replay. An implementation that cannot record the
    /// pair must fail closed with `ReplayCacheFull` rather than accept it.
    fn check_and_record(&self, minion_id: &str, nonce: &str, now: i64) -> Result<(), AuthnError>;
}

/// A minion identity whose request passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMinion(String);

impl VerifiedMinion {
    /// Crate-private so a `VerifiedMinion` only comes out of [`verify_request`].
    #[must_use]
    pub(crate) fn new(minion_id: String) -> Self {
        Self(minion_id)
    }

    /// The verified minion id.
    #[must_use]
    pub fn minion_id(&self) -> &str {
        &self.0
    }

    /// Consume and return the minion id.
    #[must_use]
    pub fn into_minion_id(self) -> String {
        self.0
    }
}

/// Verify a signed enrollment request.
///
/// Checks run in this order:
/// 1. Field shape (`MalformedRequest`)
/// 2. Freshness, `|now - timestamp| <= max_skew_seconds` (`StaleTimestamp`)
/// 3. HMAC in constant time (`BadSignature`)
/// 4. Replay, recording the nonce on success (`ReplayedNonce`, or
///    `ReplayCacheFull` when the cache has no room)
///
/// # Errors
///
/// Returns the first failing check.
#[must_use = "verification result must be checked"]
pub fn verify_request<S, R>(
    request: &EnrollmentRequest,
    now_utc_seconds: i64,
    max_skew_seconds: i64,
    secrets: &S,
    replay_cache: &R,
) -> Result<VerifiedMinion, AuthnError>
where
    S: SecretStore + ?Sized,
    R: ReplayCache + ?Sized,
{
    let message =
        build_canonical_message(&request.minion_id, request.timestamp, &request.nonce)?;

    // Saturating arithmetic handles extreme timestamps in both directions
    let age = now_utc_seconds.saturating_sub(request.timestamp);
    let future_age = request.timestamp.saturating_sub(now_utc_seconds);
    if age > max_skew_seconds || future_age > max_skew_seconds {
        return Err(AuthnError::StaleTimestamp);
    }

    let secret = secrets
        .secret_for(&request.minion_id)
        .ok_or(AuthnError::BadSignature)?;
    let provided = hex::decode(request.signature.trim()).map_err(|_| AuthnError::BadSignature)?;

    let mut mac = new_mac(secret);
    mac.update(&message);
    mac.verify_slice(&provided)
        .map_err(|_| AuthnError::BadSignature)?;

    // Replay check comes after the signature so unauthenticated requests
    // cannot fill the cache or burn a legitimate minion's nonce.
    replay_cache.check_and_record(&request.minion_id, &request.nonce, now_utc_seconds)?;

    Ok(VerifiedMinion::new(request.minion_id.clone()))
}

/// Verifier bundling the secret store, nonce cache, freshness window and clock.
pub struct SignatureVerifier {
    secrets: Arc<dyn SecretStore>,
    nonces: Arc<NonceCache>,
    freshness_window_secs: i64,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    /// Create a verifier.
    ///
    /// `nonces` should have been built with the same `freshness_window`.
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        nonces: Arc<NonceCache>,
        freshness_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secrets,
            nonces,
            freshness_window_secs: i64::try_from(freshness_window.as_secs()).unwrap_or(i64::MAX),
            clock,
        }
    }

    /// Verify `request` against the current time.
    ///
    /// # Errors
    ///
    /// See [`verify_request`].
    pub fn verify(&self, request: &EnrollmentRequest) -> Result<VerifiedMinion, AuthnError> {
        verify_request(
            request,
            self.clock.unix_seconds(),
            self.freshness_window_secs,
            self.secrets.as_ref(),
            self.nonces.as_ref(),
        )
    }

    /// Freshness window in seconds.
    pub fn freshness_window_secs(&self) -> i64 {
        self.freshness_window_secs
    }

    /// The nonce cache backing replay detection.
    pub fn nonce_cache(&self) -> &NonceCache {
        &self.nonces
    }
}
