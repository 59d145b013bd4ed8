//! Enrollment secret storage.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret used to key enrollment request signatures.
///
/// Zeroized on drop; `Debug` never prints the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnrollmentSecret(Vec<u8>);

impl EnrollmentSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for EnrollmentSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnrollmentSecret(***)")
    }
}

/// Resolves the secret a given minion signs its requests with.
///
/// Read-only from the verifier's point of view. Returning `None` rejects the
/// request as a bad signature.
pub trait SecretStore: Send + Sync {
    /// Look up the secret for `minion_id`.
    fn secret_for(&self, minion_id: &str) -> Option<&EnrollmentSecret>;
}

/// A single secret shared by every minion.
#[derive(Debug, Clone)]
pub struct StaticSecretStore {
    secret: EnrollmentSecret,
}

impl StaticSecretStore {
    /// Create a store that answers every lookup with `secret`.
    #[must_use]
    pub fn new(secret: EnrollmentSecret) -> Self {
        Self { secret }
    }
}

impl SecretStore for StaticSecretStore {
    fn secret_for(&self, _minion_id: &str) -> Option<&EnrollmentSecret> {
        Some(&self.secret)
    }
}
