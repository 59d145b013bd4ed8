//! Administrative token management handlers.

use axum::extract::{Path, Query, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use subtle::ConstantTimeEq;

use super::error::AdminError;
use super::AppState;
use crate::services::{InstallTokenGrant, TokenSummary};

/// The configured admin bearer token.
///
/// Only its SHA-256 is kept, so comparison runs over fixed-length digests.
pub struct AdminToken {
    digest: [u8; 32],
}

impl AdminToken {
    pub fn new(token: &str) -> Self {
        Self {
            digest: Sha256::digest(token.as_bytes()).into(),
        }
    }

    /// Constant-time check of a presented token.
    pub fn verify(&self, presented: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        self.digest.ct_eq(&presented).into()
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(***)")
    }
}

/// Middleware requiring `Authorization: Bearer <admin token>`.
///
/// With no admin token configured every request is refused.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let Some(expected) = state.admin_token.as_deref() else {
        tracing::warn!(path = %request.uri().path(), "Admin API called but no admin token is configured");
        return Err(AdminError::Unauthorized);
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| expected.verify(token.trim()));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Admin request with missing or invalid token");
        return Err(AdminError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct IssueTokenParams {
    #[serde(default)]
    minion_id: String,
    ttl_seconds: Option<u64>,
    bound_ip: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenListResponse {
    pub tokens: Vec<TokenSummary>,
    pub total: usize,
}

/// `POST /salt-key/install-token?minion_id=...&ttl_seconds=...[&bound_ip=...]`
pub async fn issue_token(
    State(state): State<AppState>,
    Query(params): Query<IssueTokenParams>,
) -> Result<Json<InstallTokenGrant>, AdminError> {
    let bound_ip = match params.bound_ip.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<IpAddr>()
                .map_err(|_| AdminError::BadRequest("bound_ip is not a valid IP address"))?,
        ),
    };

    let grant = state
        .service
        .issue_token(&params.minion_id, params.ttl_seconds, bound_ip)?;
    Ok(Json(grant))
}

/// `GET /salt-key/install-tokens`
pub async fn list_tokens(State(state): State<AppState>) -> Json<TokenListResponse> {
    let tokens = state.service.list_tokens();
    Json(TokenListResponse {
        total: tokens.len(),
        tokens,
    })
}

/// `DELETE /salt-key/install-token/:token`
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AdminError> {
    if state.service.revoke_token(&token) {
        Ok(Json(json!({ "message": "token revoked" })))
    } else {
        Err(AdminError::NotFound)
    }
}
