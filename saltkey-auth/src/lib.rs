//! Pure enrollment authentication library for saltkey.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Dependencies are injected via traits:
//! - [`Clock`] - Wall-clock time source
//! - [`authn::SecretStore`] - Enrollment secret lookup
//! - [`authn::ReplayCache`] - Nonce tracking for replay prevention
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use saltkey_auth::authn::*;
//! use saltkey_auth::{Clock, SystemClock};
//!
//! let secret = EnrollmentSecret::new(b"0123456789abcdef0123456789abcdef".to_vec());
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let verifier = SignatureVerifier::new(
//!     Arc::new(StaticSecretStore::new(secret.clone())),
//!     Arc::new(NonceCache::new(Duration::from_secs(300), 10_000)),
//!     Duration::from_secs(300),
//!     clock.clone(),
//! );
//!
//! let request = EnrollmentRequest::sign(&secret, "minion-01", clock.unix_seconds(), &generate_nonce());
//! assert!(verifier.verify(&request).is_ok());
//! ```

pub mod authn;
pub mod clock;
pub mod enrollment;

pub use authn::{
    generate_nonce, AuthnError, EnrollmentRequest, EnrollmentSecret, NonceCache, ReplayCache,
    SecretStore, SignatureVerifier, StaticSecretStore, VerifiedMinion,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use enrollment::{mask_token, InstallToken, IssuedToken, TokenError, TokenStore};
