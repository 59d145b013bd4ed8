//! Daemon configuration from environment variables.

use saltkey_auth::EnrollmentSecret;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum length of the shared enrollment secret in bytes.
pub const MIN_SECRET_LEN: usize = 16;

const DEFAULT_MASTER_PUB_PATH: &str = "/etc/salt/pki/master/master.pub";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Runtime configuration for the daemon.
#[derive(Clone)]
pub struct Config {
    pub enrollment_secret: EnrollmentSecret,
    pub master_pub_path: PathBuf,
    /// W: accepted clock skew for signed requests.
    pub freshness_window: Duration,
    /// TTL used when an admin omits `ttl_seconds`.
    pub default_token_ttl: Duration,
    pub listen_addr: SocketAddr,
    /// Base URL minions use to reach this service, without a trailing slash.
    pub public_url: String,
    /// Bearer token for the admin API. Admin routes reject everything when unset.
    pub admin_token: Option<String>,
    pub enforce_token_ip: bool,
    pub trust_forwarded_for: bool,
    pub key_read_timeout: Duration,
    /// Upper bound on the per-request deadline.
    pub request_timeout: Duration,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
    pub max_nonce_entries: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("enrollment_secret", &self.enrollment_secret)
            .field("master_pub_path", &self.master_pub_path)
            .field("freshness_window", &self.freshness_window)
            .field("default_token_ttl", &self.default_token_ttl)
            .field("listen_addr", &self.listen_addr)
            .field("public_url", &self.public_url)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "***"))
            .field("enforce_token_ip", &self.enforce_token_ip)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("key_read_timeout", &self.key_read_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("max_nonce_entries", &self.max_nonce_entries)
            .finish()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("SALTKEY_ENROLLMENT_SECRET must be at least 16 bytes, got {0}")]
    SecretTooShort(usize),
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get("SALTKEY_ENROLLMENT_SECRET")
            .ok_or(ConfigError::Missing("SALTKEY_ENROLLMENT_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort(secret.len()));
        }

        let freshness_secs: u64 = parse_or(&get, "SALTKEY_FRESHNESS_WINDOW_SECS", 300)?;
        if freshness_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SALTKEY_FRESHNESS_WINDOW_SECS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let listen_addr: SocketAddr = match get("SALTKEY_LISTEN_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: "SALTKEY_LISTEN_ADDR",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_LISTEN_ADDR
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    var: "SALTKEY_LISTEN_ADDR",
                    value: DEFAULT_LISTEN_ADDR.into(),
                    reason: e.to_string(),
                })?,
        };

        let public_url = get("SALTKEY_PUBLIC_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{listen_addr}"));

        Ok(Self {
            enrollment_secret: EnrollmentSecret::new(secret.into_bytes()),
            master_pub_path: get("SALTKEY_MASTER_PUB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MASTER_PUB_PATH)),
            freshness_window: Duration::from_secs(freshness_secs),
            default_token_ttl: Duration::from_secs(parse_or(
                &get,
                "SALTKEY_DEFAULT_TOKEN_TTL_SECS",
                3600,
            )?),
            listen_addr,
            public_url,
            admin_token: get("SALTKEY_ADMIN_TOKEN"),
            enforce_token_ip: parse_bool(&get, "SALTKEY_ENFORCE_TOKEN_IP")?,
            trust_forwarded_for: parse_bool(&get, "SALTKEY_TRUST_FORWARDED_FOR")?,
            key_read_timeout: Duration::from_millis(parse_or(
                &get,
                "SALTKEY_KEY_READ_TIMEOUT_MS",
                5000,
            )?),
            request_timeout: Duration::from_millis(parse_or(
                &get,
                "SALTKEY_REQUEST_TIMEOUT_MS",
                10_000,
            )?),
            rate_limit_per_sec: parse_or(&get, "SALTKEY_RATE_LIMIT_PER_SEC", 20)?,
            rate_limit_burst: parse_or(&get, "SALTKEY_RATE_LIMIT_BURST", 100)?,
            max_nonce_entries: parse_or(&get, "SALTKEY_MAX_NONCE_ENTRIES", 100_000)?,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(var) else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected true or false".into(),
        }),
    }
}
