//! Signed enrollment request types.
//!
//! A minion proves knowledge of the enrollment secret by sending an HMAC over
//! its identity, the current time and a fresh nonce. The server recomputes the
//! HMAC and checks freshness and uniqueness.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::error::AuthnError;
use super::secret::EnrollmentSecret;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Maximum minion id length in bytes.
pub const MAX_MINION_ID_LEN: usize = 255;

/// Maximum nonce length in bytes.
pub const MAX_NONCE_LEN: usize = 128;

/// Field separator of the canonical message.
const SEPARATOR: u8 = b'|';

/// A signed request for the controller public key.
///
/// # Note on Public Fields
///
/// This is a data transfer object. Constructing one proves nothing; always run
/// it through [`SignatureVerifier`](super::SignatureVerifier) before trusting
/// the minion id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    /// Claimed minion identity.
    pub minion_id: String,
    /// Unix timestamp in seconds at signing time.
    pub timestamp: i64,
    /// Client-chosen random nonce (hex or base64).
    pub nonce: String,
    /// Lowercase hex HMAC-SHA256 over the canonical message.
    pub signature: String,
}

impl EnrollmentRequest {
    /// Build and sign a request with `secret`.
    ///
    /// Used by bootstrap tooling; the server never signs.
    #[must_use]
    pub fn sign(secret: &EnrollmentSecret, minion_id: &str, timestamp: i64, nonce: &str) -> Self {
        Self {
            minion_id: minion_id.to_string(),
            timestamp,
            nonce: nonce.to_string(),
            signature: compute_signature(secret, minion_id, timestamp, nonce),
        }
    }
}

impl std::fmt::Debug for EnrollmentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("minion_id", &self.minion_id)
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .field("signature", &"[signature]")
            .finish()
    }
}

/// Generate a 16-byte random nonce, hex encoded.
#[must_use]
pub fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Build the canonical message that gets signed.
///
/// Format: `minion_id "|" timestamp "|" nonce`, timestamp in decimal.
///
/// # Errors
///
/// Returns `AuthnError::MalformedRequest` if:
/// - The minion id is empty, longer than 255 bytes, or contains `|` or NUL
/// - The nonce is empty, longer than 128 bytes, or contains NUL
pub fn build_canonical_message(
    minion_id: &str,
    timestamp: i64,
    nonce: &str,
) -> Result<Vec<u8>, AuthnError> {
    let id = minion_id.as_bytes();
    if id.is_empty() || id.len() > MAX_MINION_ID_LEN || id.contains(&SEPARATOR) || id.contains(&0)
    {
        return Err(AuthnError::MalformedRequest);
    }
    // The nonce is the last field, so a separator inside it cannot shift
    // field boundaries.
    let nonce = nonce.as_bytes();
    if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN || nonce.contains(&0) {
        return Err(AuthnError::MalformedRequest);
    }

    let timestamp = timestamp.to_string();
    let mut msg = Vec::with_capacity(id.len() + timestamp.len() + nonce.len() + 2);
    msg.extend_from_slice(id);
    msg.push(SEPARATOR);
    msg.extend_from_slice(timestamp.as_bytes());
    msg.push(SEPARATOR);
    msg.extend_from_slice(nonce);
    Ok(msg)
}

/// Compute the hex signature for the given fields.
///
/// Invalid fields still produce a signature (over the raw concatenation); the
/// verifier rejects them before comparing.
#[must_use]
pub fn compute_signature(
    secret: &EnrollmentSecret,
    minion_id: &str,
    timestamp: i64,
    nonce: &str,
) -> String {
    let message = build_canonical_message(minion_id, timestamp, nonce)
        .unwrap_or_else(|_| format!("{minion_id}|{timestamp}|{nonce}").into_bytes());
    let mut mac = new_mac(secret);
    mac.update(&message);
    hex::encode(mac.finalize().into_bytes())
}

pub(crate) fn new_mac(secret: &EnrollmentSecret) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}
