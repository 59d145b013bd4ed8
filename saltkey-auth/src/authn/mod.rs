//! Signed-request authentication for minion enrollment.

mod error;
mod nonce_cache;
mod request;
mod secret;
mod verify;

pub use error::AuthnError;
pub use nonce_cache::NonceCache;
pub use request::{
    build_canonical_message, compute_signature, generate_nonce, EnrollmentRequest,
    MAX_MINION_ID_LEN, MAX_NONCE_LEN,
};
pub use secret::{EnrollmentSecret, SecretStore, StaticSecretStore};
pub use verify::{verify_request, ReplayCache, SignatureVerifier, VerifiedMinion};
