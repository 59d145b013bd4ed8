//! HTTP API.
//!
//! Minion routes are rate limited and answer rejections generically. Admin
//! routes sit behind a bearer token. Every route runs under the per-request
//! deadline.

mod admin;
mod client_ip;
mod deadline;
mod error;
mod minion;

use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub use admin::{AdminToken, TokenListResponse};
pub use client_ip::client_ip;
pub use deadline::{effective_timeout, REQUEST_TIMEOUT_HEADER};
pub use error::{AdminError, MinionError, PlainMinionError, REJECTED_MESSAGE};
pub use minion::{MasterPubResponse, CHECKSUM_HEADER};

use crate::services::{rate_limit, KeyDistributionService, KeyRequestRateLimiter};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KeyDistributionService>,
    pub admin_token: Option<Arc<AdminToken>>,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        service: Arc<KeyDistributionService>,
        admin_token: Option<&str>,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            service,
            admin_token: admin_token.map(|token| Arc::new(AdminToken::new(token))),
            trust_forwarded_for,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, limiter: KeyRequestRateLimiter, request_timeout: Duration) -> Router {
    let minion_routes = Router::new()
        .route("/salt-key/master-pub", post(minion::master_pub_signed))
        .route("/salt-key/master-pub/simple", get(minion::master_pub_simple))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit));

    let admin_routes = Router::new()
        .route("/salt-key/install-token", post(admin::issue_token))
        .route("/salt-key/install-tokens", get(admin::list_tokens))
        .route("/salt-key/install-token/:token", delete(admin::revoke_token))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .merge(minion_routes)
        .merge(admin_routes)
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(
            request_timeout,
            deadline::enforce_deadline,
        ))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
