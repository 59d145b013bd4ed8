//! Signed-request authentication error types.

/// Reasons a signed enrollment request is rejected.
///
/// These are precise and intended for server-side logs. Minion-facing
/// responses must not echo them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthnError {
    /// The HMAC signature is missing, undecodable or does not match.
    #[error("bad signature")]
    BadSignature,

    /// The timestamp is outside the freshness window.
    #[error("stale timestamp")]
    StaleTimestamp,

    /// The (minion id, nonce) pair was already accepted within the retention window.
    #[error("replayed nonce")]
    ReplayedNonce,

    /// The replay cache is full of live entries, so the nonce cannot be recorded.
    #[error("replay cache full")]
    ReplayCacheFull,

    /// The request fields cannot form a canonical message.
    #[error("malformed request")]
    MalformedRequest,
}

impl AuthnError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::StaleTimestamp => "stale_timestamp",
            Self::ReplayedNonce => "replayed_nonce",
            Self::ReplayCacheFull => "replay_cache_full",
            Self::MalformedRequest => "malformed_request",
        }
    }
}
