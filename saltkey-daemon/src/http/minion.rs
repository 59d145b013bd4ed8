//! Minion-facing key retrieval handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Json;
use saltkey_auth::EnrollmentRequest;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::client_ip::client_ip;
use super::error::{MinionError, PlainMinionError};
use super::AppState;

/// Header carrying the hex SHA-256 of the key on the simple endpoint.
pub const CHECKSUM_HEADER: &str = "x-master-pub-checksum";

/// Successful answer to a signed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct MasterPubResponse {
    /// Standard base64 of the key file.
    pub master_pub: String,
    /// Hex SHA-256 of the key file.
    pub checksum: String,
    /// Server time, Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct SimpleParams {
    token: Option<String>,
}

/// `POST /salt-key/master-pub`
pub async fn master_pub_signed(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<EnrollmentRequest>, JsonRejection>,
) -> Result<Json<MasterPubResponse>, MinionError> {
    let client = client_ip(connect_info, &headers, state.trust_forwarded_for);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(
                client_ip = ?client,
                reason = "malformed_body",
                error = %rejection.body_text(),
                "Signed key request rejected"
            );
            return Err(MinionError::Rejected);
        }
    };

    let delivery = state.service.fetch_signed(&request, client).await?;

    Ok(Json(MasterPubResponse {
        master_pub: delivery.key.base64().to_string(),
        checksum: delivery.key.checksum_hex().to_string(),
        timestamp: delivery.timestamp,
    }))
}

/// `GET /salt-key/master-pub/simple?token=...`
///
/// Returns the raw key so an installer can pipe it straight to disk.
pub async fn master_pub_simple(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<SimpleParams>,
) -> Result<Response, PlainMinionError> {
    let client = client_ip(connect_info, &headers, state.trust_forwarded_for);

    let Some(token) = params.token.filter(|t| !t.trim().is_empty()) else {
        tracing::warn!(
            client_ip = ?client,
            reason = "missing_token",
            "Install token rejected"
        );
        return Err(MinionError::Rejected.plain());
    };

    let key = state.service.fetch_with_token(&token, client).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                HeaderName::from_static(CHECKSUM_HEADER),
                key.checksum_hex().to_string(),
            ),
        ],
        key.bytes().clone(),
    )
        .into_response())
}
