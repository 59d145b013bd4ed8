//! Rate limiting for the minion-facing endpoints.
//!
//! Bounds how fast each client can guess at signatures and tokens. Budgets are
//! kept per client address, so one noisy caller cannot starve a fleet
//! bootstrap.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::http::client_ip;

const DEFAULT_PER_SECOND: NonZeroU32 = match NonZeroU32::new(20) {
    Some(n) => n,
    None => unreachable!(),
};
const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// Bucket for requests whose client address cannot be determined.
const UNKNOWN_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Shared per-client limiter for key retrieval requests.
#[derive(Clone)]
pub struct KeyRequestRateLimiter {
    limiter: Arc<RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>>,
    trust_forwarded_for: bool,
}

impl KeyRequestRateLimiter {
    /// Create a limiter with a sustained rate and a burst allowance per client.
    ///
    /// Zero values fall back to the defaults (20/s, burst 100).
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(DEFAULT_PER_SECOND);
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(DEFAULT_BURST);

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            trust_forwarded_for: false,
        }
    }

    /// Key clients by the first `x-forwarded-for` entry when behind a trusted proxy.
    #[must_use]
    pub fn with_trusted_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Returns `true` if the client is within its limit.
    pub fn check(&self, client: IpAddr) -> bool {
        self.limiter.check_key(&client).is_ok()
    }

    /// Drop buckets of clients that have fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

impl Default for KeyRequestRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_SECOND.get(), DEFAULT_BURST.get())
    }
}

/// Axum middleware answering 429 once the client's budget is exhausted.
pub async fn rate_limit(
    State(limiter): State<KeyRequestRateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(connect_info, request.headers(), limiter.trust_forwarded_for)
        .unwrap_or(UNKNOWN_CLIENT);

    if !limiter.check(client) {
        tracing::warn!(
            client_ip = %client,
            path = %request.uri().path(),
            "Rate limit exceeded for key endpoint"
        );
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded, try again later",
        )
            .into_response();
    }
    next.run(request).await
}
