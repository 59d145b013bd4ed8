//! HTTP error mapping.
//!
//! Minion-facing endpoints collapse every rejection into one generic answer so
//! an unauthenticated caller learns nothing about why it was refused. The admin
//! API is authenticated and reports the precise reason.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use saltkey_auth::TokenError;
use serde_json::json;

use crate::services::DistributionError;

/// Generic body for every rejected minion request.
pub const REJECTED_MESSAGE: &str = "request rejected";

const INTERNAL_MESSAGE: &str = "internal error";

/// Error returned to minions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinionError {
    /// Authentication, freshness, replay or token failure.
    Rejected,
    /// The key could not be served.
    Internal,
}

impl MinionError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Rejected => REJECTED_MESSAGE,
            Self::Internal => INTERNAL_MESSAGE,
        }
    }

    /// Same error, rendered as a plain text body.
    #[must_use]
    pub fn plain(self) -> PlainMinionError {
        PlainMinionError(self)
    }
}

impl From<DistributionError> for MinionError {
    fn from(error: DistributionError) -> Self {
        if error.is_client_error() {
            Self::Rejected
        } else {
            Self::Internal
        }
    }
}

impl IntoResponse for MinionError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.message() }))).into_response()
    }
}

/// [`MinionError`] for endpoints that answer in `text/plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlainMinionError(pub MinionError);

impl From<DistributionError> for PlainMinionError {
    fn from(error: DistributionError) -> Self {
        Self(MinionError::from(error))
    }
}

impl IntoResponse for PlainMinionError {
    fn into_response(self) -> Response {
        (self.0.status_code(), self.0.message()).into_response()
    }
}

/// Error returned by the admin API.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("token not found")]
    NotFound,

    #[error(transparent)]
    Service(#[from] DistributionError),
}

impl AdminError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Service(DistributionError::Token(TokenError::TokenNotFound)) => {
                StatusCode::NOT_FOUND
            }
            Self::Service(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) => "invalid_request",
            Self::NotFound => "token_not_found",
            Self::Service(e) => e.code(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response();
        }
        (status, body).into_response()
    }
}
