//! Master public key distribution service.
//!
//! Owns every piece of shared state (verifier, nonce cache, token store and
//! key provider). Built once at startup and shared by `Arc` between the HTTP
//! handlers and the sweeper.

use chrono::{DateTime, Utc};
use saltkey_auth::authn::MAX_MINION_ID_LEN;
use saltkey_auth::{
    mask_token, AuthnError, Clock, EnrollmentRequest, InstallToken, NonceCache, SignatureVerifier,
    StaticSecretStore, TokenError, TokenStore,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::master_key::{FileKeySource, KeyError, MasterKeyProvider, MasterPublicKey};

/// Settings the service needs beyond its components.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Base URL used to build `master_pub_url`, without a trailing slash.
    pub public_url: String,
    /// TTL for tokens issued without an explicit one.
    pub default_token_ttl: Duration,
}

/// Errors surfaced by the distribution service.
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error(transparent)]
    Authn(#[from] AuthnError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

impl DistributionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authn(e) => e.code(),
            Self::Token(e) => e.code(),
            Self::Key(_) => "key_read_failure",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Whether the caller is at fault, as opposed to the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Key(_) | Self::Token(TokenError::RandomSourceExhausted)
        )
    }
}

/// Key handed to a verified minion.
#[derive(Debug, Clone)]
pub struct KeyDelivery {
    pub key: Arc<MasterPublicKey>,
    /// Server time of delivery, Unix seconds.
    pub timestamp: i64,
}

/// Result of issuing an install token through the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallTokenGrant {
    pub token: String,
    pub minion_id: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub master_pub_url: String,
}

/// Masked view of a stored token for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub token: String,
    pub minion_id: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&InstallToken> for TokenSummary {
    fn from(record: &InstallToken) -> Self {
        Self {
            token: record.masked(),
            minion_id: record.minion_id().to_string(),
            expires_at: record.expires_at(),
            used: record.used(),
            created_at: record.created_at(),
        }
    }
}

/// Counts from one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub nonces: usize,
    pub tokens: usize,
}

/// Distributes the master public key to signed or token-bearing minions.
pub struct KeyDistributionService {
    verifier: SignatureVerifier,
    tokens: TokenStore,
    master_key: MasterKeyProvider,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl KeyDistributionService {
    pub fn new(
        verifier: SignatureVerifier,
        tokens: TokenStore,
        master_key: MasterKeyProvider,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            verifier,
            tokens,
            master_key,
            clock,
            settings,
        }
    }

    /// Wire up the production components from configuration.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let verifier = SignatureVerifier::new(
            Arc::new(StaticSecretStore::new(config.enrollment_secret.clone())),
            Arc::new(NonceCache::new(
                config.freshness_window,
                config.max_nonce_entries,
            )),
            config.freshness_window,
            Arc::clone(&clock),
        );
        let tokens = TokenStore::new(Arc::clone(&clock), config.enforce_token_ip);
        let master_key = MasterKeyProvider::new(
            Arc::new(FileKeySource::new(&config.master_pub_path)),
            config.key_read_timeout,
            Arc::clone(&clock),
        );

        Self::new(
            verifier,
            tokens,
            master_key,
            clock,
            ServiceSettings {
                public_url: config.public_url.clone(),
                default_token_ttl: config.default_token_ttl,
            },
        )
    }

    /// Serve the key to a minion that signed its request.
    ///
    /// # Errors
    ///
    /// `Authn` when verification fails, `Key` when the key cannot be loaded.
    pub async fn fetch_signed(
        &self,
        request: &EnrollmentRequest,
        client_ip: Option<IpAddr>,
    ) -> Result<KeyDelivery, DistributionError> {
        let client = display_ip(client_ip);

        let verified = self.verifier.verify(request).map_err(|e| {
            tracing::warn!(
                minion_id = %request.minion_id,
                client_ip = %client,
                reason = e.code(),
                "Signed key request rejected"
            );
            e
        })?;

        let key = self.read_key(verified.minion_id(), &client).await?;

        tracing::info!(
            minion_id = %verified.minion_id(),
            client_ip = %client,
            "Master public key delivered"
        );
        Ok(KeyDelivery {
            key,
            timestamp: self.clock.unix_seconds(),
        })
    }

    /// Serve the key to a minion presenting an install token.
    ///
    /// The token is consumed only after the key has loaded, so a key read
    /// failure leaves it usable. When two callers race, the loser gets
    /// `TokenAlreadyUsed`.
    ///
    /// # Errors
    ///
    /// `Token` when the token is rejected, `Key` when the key cannot be loaded.
    pub async fn fetch_with_token(
        &self,
        token: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<Arc<MasterPublicKey>, DistributionError> {
        let client = display_ip(client_ip);
        let masked = mask_token(token);

        let record = self.tokens.validate(token, client_ip).map_err(|e| {
            let minion_id = self.tokens.get(token).map(|r| r.minion_id().to_string());
            reject_token(minion_id.as_deref(), &masked, &client, e)
        })?;

        if !self.tokens.enforces_ip() && !record.ip_matches(client_ip) {
            tracing::warn!(
                minion_id = %record.minion_id(),
                token = %masked,
                client_ip = %client,
                bound_ip = ?record.bound_ip(),
                "Install token used from an address other than the pinned one"
            );
        }

        let key = self.read_key(record.minion_id(), &client).await?;

        let record = self
            .tokens
            .consume(token, client_ip)
            .map_err(|e| reject_token(Some(record.minion_id()), &masked, &client, e))?;

        tracing::info!(
            minion_id = %record.minion_id(),
            token = %masked,
            client_ip = %client,
            "Master public key delivered via install token"
        );
        Ok(key)
    }

    /// Issue an install token.
    ///
    /// A missing or zero `ttl_seconds` uses the configured default. The TTL is
    /// clamped to between one second and one day.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an unusable minion id, `Token` if the RNG fails.
    pub fn issue_token(
        &self,
        minion_id: &str,
        ttl_seconds: Option<u64>,
        bound_ip: Option<IpAddr>,
    ) -> Result<InstallTokenGrant, DistributionError> {
        let minion_id = minion_id.trim();
        if minion_id.is_empty() {
            return Err(DistributionError::InvalidRequest("minion_id is required"));
        }
        if minion_id.len() > MAX_MINION_ID_LEN || minion_id.contains(['|', '\0']) {
            return Err(DistributionError::InvalidRequest("minion_id is not valid"));
        }

        let ttl = match ttl_seconds {
            None | Some(0) => self.settings.default_token_ttl,
            Some(secs) => Duration::from_secs(secs),
        };

        let issued = self.tokens.issue(minion_id, ttl, bound_ip).map_err(|e| {
            tracing::error!(minion_id = %minion_id, error = %e, "Install token generation failed");
            e
        })?;

        let record = &issued.record;
        let ttl_seconds = (record.expires_at() - record.created_at())
            .num_seconds()
            .unsigned_abs();

        tracing::info!(
            minion_id = %minion_id,
            token = %record.masked(),
            expires_at = %record.expires_at(),
            bound_ip = ?record.bound_ip(),
            "Install token issued"
        );

        Ok(InstallTokenGrant {
            master_pub_url: format!(
                "{}/salt-key/master-pub/simple?token={}",
                self.settings.public_url, issued.token
            ),
            minion_id: minion_id.to_string(),
            expires_at: record.expires_at(),
            ttl_seconds,
            token: issued.token,
        })
    }

    /// Masked listing of live tokens, newest first.
    pub fn list_tokens(&self) -> Vec<TokenSummary> {
        self.tokens.list().iter().map(TokenSummary::from).collect()
    }

    /// Revoke a token. Returns `false` if it was unknown.
    pub fn revoke_token(&self, token: &str) -> bool {
        let revoked = self.tokens.revoke(token);
        if revoked {
            tracing::info!(token = %mask_token(token), "Install token revoked");
        } else {
            tracing::warn!(token = %mask_token(token), "Revoke requested for unknown install token");
        }
        revoked
    }

    /// Drop expired nonces and tokens.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        SweepStats {
            nonces: self.verifier.nonce_cache().sweep(now.timestamp()),
            tokens: self.tokens.sweep(now),
        }
    }

    pub fn master_key(&self) -> &MasterKeyProvider {
        &self.master_key
    }

    /// Freshness window W.
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.verifier.freshness_window_secs().unsigned_abs())
    }

    async fn read_key(
        &self,
        minion_id: &str,
        client: &str,
    ) -> Result<Arc<MasterPublicKey>, DistributionError> {
        self.master_key.read().await.map_err(|e| {
            tracing::error!(
                minion_id = %minion_id,
                client_ip = %client,
                error = %e,
                "Master public key unavailable"
            );
            DistributionError::Key(e)
        })
    }
}

fn reject_token(
    minion_id: Option<&str>,
    masked: &str,
    client: &str,
    error: TokenError,
) -> DistributionError {
    tracing::warn!(
        minion_id = minion_id.unwrap_or("unknown"),
        token = %masked,
        client_ip = %client,
        reason = error.code(),
        "Install token rejected"
    );
    DistributionError::Token(error)
}

fn display_ip(ip: Option<IpAddr>) -> String {
    ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}
