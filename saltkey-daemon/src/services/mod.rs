//! Service layer.

mod distribution;
mod rate_limit;

pub use distribution::{
    DistributionError, InstallTokenGrant, KeyDelivery, KeyDistributionService, ServiceSettings,
    SweepStats, TokenSummary,
};
pub use rate_limit::{rate_limit, KeyRequestRateLimiter};
