//! Cached access to the Salt master public key.
//!
//! Uses arc-swap so request handlers read the current key snapshot without
//! locking. The key file is read once on first use and again only on an
//! explicit reload (SIGHUP) or after invalidation.

use arc_swap::ArcSwapOption;
use base64::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use saltkey_auth::Clock;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Errors that can occur while loading the master public key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read master public key from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("master public key file {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("timed out reading master public key from {}", path.display())]
    Timeout { path: PathBuf },
}

/// Where the master public key bytes come from.
///
/// `load` is blocking and runs on the blocking thread pool.
pub trait KeySource: Send + Sync + 'static {
    /// Location reported in errors.
    fn location(&self) -> &Path;

    /// Read the raw key bytes.
    fn load(&self) -> Result<Vec<u8>, KeyError>;
}

/// Reads the key from a file on disk.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeySource for FileKeySource {
    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<u8>, KeyError> {
        let bytes = std::fs::read(&self.path).map_err(|source| KeyError::Io {
            path: self.path.clone(),
            source,
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(KeyError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(bytes)
    }
}

/// An immutable snapshot of the master public key.
///
/// Encodings are computed once at load time so serving the key does no hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterPublicKey {
    bytes: Bytes,
    checksum: [u8; 32],
    checksum_hex: String,
    base64: String,
    loaded_at: DateTime<Utc>,
}

impl MasterPublicKey {
    pub fn new(bytes: impl Into<Bytes>, loaded_at: DateTime<Utc>) -> Self {
        let bytes = bytes.into();
        let checksum: [u8; 32] = Sha256::digest(&bytes).into();
        Self {
            checksum_hex: hex::encode(checksum),
            base64: BASE64_STANDARD.encode(&bytes),
            bytes,
            checksum,
            loaded_at,
        }
    }

    /// Raw key bytes as read from the source.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// SHA-256 of the key bytes.
    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    /// Lowercase hex SHA-256 of the key bytes.
    pub fn checksum_hex(&self) -> &str {
        &self.checksum_hex
    }

    /// Standard base64 of the key bytes.
    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

type PendingRead = JoinHandle<Result<Vec<u8>, KeyError>>;

/// Lazily loaded, atomically replaceable master public key.
pub struct MasterKeyProvider {
    source: Arc<dyn KeySource>,
    current: ArcSwapOption<MasterPublicKey>,
    /// Serializes loads so concurrent first readers trigger a single read.
    /// Holds a read that outlived its timeout, so it is awaited again
    /// instead of piling up blocked threads.
    load_lock: Mutex<Option<PendingRead>>,
    read_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl MasterKeyProvider {
    pub fn new(source: Arc<dyn KeySource>, read_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            current: ArcSwapOption::empty(),
            load_lock: Mutex::new(None),
            read_timeout,
            clock,
        }
    }

    /// Current key, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if the key is not cached and loading it fails.
    /// Failures are not cached; the next call tries again.
    pub async fn read(&self) -> Result<Arc<MasterPublicKey>, KeyError> {
        if let Some(key) = self.current.load_full() {
            return Ok(key);
        }

        let mut pending = self.load_lock.lock().await;
        // Another caller may have finished loading while we waited
        if let Some(key) = self.current.load_full() {
            return Ok(key);
        }

        let key = Arc::new(self.load(&mut pending).await?);
        self.current.store(Some(Arc::clone(&key)));
        tracing::info!(
            path = %self.source.location().display(),
            checksum = %key.checksum_hex(),
            "Master public key loaded"
        );
        Ok(key)
    }

    /// Drop the cached key; the next `read` loads it again.
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    /// Load the key now and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if loading fails.
    pub async fn reload(&self) -> Result<Arc<MasterPublicKey>, KeyError> {
        let mut pending = self.load_lock.lock().await;
        let key = Arc::new(self.load(&mut pending).await?);
        self.current.store(Some(Arc::clone(&key)));
        Ok(key)
    }

    /// Cached key without triggering a load.
    pub fn current(&self) -> Option<Arc<MasterPublicKey>> {
        self.current.load_full()
    }

    async fn load(&self, pending: &mut Option<PendingRead>) -> Result<MasterPublicKey, KeyError> {
        let path = self.source.location().to_path_buf();
        let mut task = match pending.take() {
            Some(task) => task,
            None => {
                let source = Arc::clone(&self.source);
                tokio::task::spawn_blocking(move || source.load())
            }
        };

        let bytes = match tokio::time::timeout(self.read_timeout, &mut task).await {
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    timeout_ms = u64::try_from(self.read_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Master public key read timed out, leaving it to finish in the background"
                );
                *pending = Some(task);
                return Err(KeyError::Timeout { path });
            }
            Ok(Err(join_error)) => {
                return Err(KeyError::Io {
                    path,
                    source: io::Error::other(join_error.to_string()),
                })
            }
            Ok(Ok(result)) => result?,
        };
        Ok(MasterPublicKey::new(bytes, self.clock.now()))
    }
}
