//! One-time install tokens for minions without the enrollment secret.
//!
//! The flow is:
//! 1. An operator issues a token for a minion id through the admin API
//! 2. The token URL is handed to the installer out-of-band
//! 3. The minion pulls the master public key with the token
//! 4. The token is consumed; any further use is rejected
//!
//! # Security
//!
//! - 256-bit tokens from the OS CSPRNG, stored only as SHA-256 hashes
//! - Lifetime clamped to between one second and one day
//! - Optional pinning to the client address

mod error;
mod store;
mod token;

pub use error::TokenError;
pub use store::TokenStore;
pub use token::{
    clamp_ttl, mask_token, InstallToken, IssuedToken, MAX_TOKEN_TTL, MIN_TOKEN_TTL, TOKEN_BYTES,
};
