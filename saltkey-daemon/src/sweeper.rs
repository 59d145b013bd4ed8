//! Periodic cleanup of expired nonces, install tokens and idle rate limit buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::{KeyDistributionService, KeyRequestRateLimiter};
use crate::shutdown::ShutdownSignal;

/// Sweep interval for a freshness window: once per window, at least every second.
pub fn sweep_interval(freshness_window: Duration) -> Duration {
    freshness_window.max(Duration::from_secs(1))
}

/// Spawn the sweeper task. It stops when `shutdown` fires.
pub fn spawn_sweeper(
    service: Arc<KeyDistributionService>,
    limiter: KeyRequestRateLimiter,
    period: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        let stop = shutdown.recv();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::debug!("Sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let stats = service.sweep();
                    limiter.retain_recent();
                    if stats.nonces > 0 || stats.tokens > 0 {
                        tracing::debug!(
                            nonces = stats.nonces,
                            tokens = stats.tokens,
                            "Swept expired entries"
                        );
                    }
                }
            }
        }
    })
}
