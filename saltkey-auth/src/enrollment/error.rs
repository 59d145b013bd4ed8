//! Install token error types.

/// Errors that can occur while issuing or redeeming an install token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    /// No token with this value exists (never issued, revoked or swept).
    #[error("token not found")]
    TokenNotFound,

    /// The token's TTL has elapsed.
    #[error("token expired")]
    TokenExpired,

    /// The token was already redeemed.
    #[error("token already used")]
    TokenAlreadyUsed,

    /// The token is pinned to a different client address.
    #[error("client address does not match token")]
    IpMismatch,

    /// The OS random source failed while generating a token.
    #[error("random source exhausted")]
    RandomSourceExhausted,
}

impl TokenError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "token_not_found",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::IpMismatch => "ip_mismatch",
            Self::RandomSourceExhausted => "random_source_exhausted",
        }
    }
}
