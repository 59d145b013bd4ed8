//! saltkey daemon - distributes the Salt master public key to minions.
//!
//! Minions authenticate either with an HMAC-signed request keyed by the
//! shared enrollment secret, or with a single-use install token issued
//! through the admin API.

pub mod config;
pub mod http;
pub mod master_key;
pub mod services;
pub mod shutdown;
pub mod sweeper;

pub use config::{Config, ConfigError};
pub use master_key::{FileKeySource, KeyError, KeySource, MasterKeyProvider, MasterPublicKey};
pub use services::{DistributionError, KeyDistributionService};
