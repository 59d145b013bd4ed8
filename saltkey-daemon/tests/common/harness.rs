//! Test harness for key distribution E2E tests.
//!
//! Builds the real router in-process and drives it with `oneshot` (no network).

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use saltkey_auth::{EnrollmentRequest, EnrollmentSecret, ManualClock};
use saltkey_daemon::http::{self, AppState};
use saltkey_daemon::services::{InstallTokenGrant, KeyDistributionService, KeyRequestRateLimiter};
use saltkey_daemon::Config;
use tempfile::TempDir;
use tower::ServiceExt;

pub const T0: i64 = 1_700_000_000;
pub const SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const ADMIN_TOKEN: &str = "admin-secret";
pub const PEER: &str = "192.0.2.10:40000";
pub const MASTER_PUB: &[u8] = b"-----BEGIN PUBLIC KEY-----\nMIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAtestkey\n-----END PUBLIC KEY-----\n";

/// Knobs for [`TestDaemon::with_options`].
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub admin_token: Option<&'static str>,
    pub enforce_token_ip: bool,
    pub trust_forwarded_for: bool,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
    pub write_key: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            admin_token: Some(ADMIN_TOKEN),
            enforce_token_ip: false,
            trust_forwarded_for: false,
            rate_limit_per_sec: 10_000,
            rate_limit_burst: 10_000,
            write_key: true,
        }
    }
}

/// A response with its body collected.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).expect("response body is not UTF-8")
    }
}

/// In-process daemon with a manual clock and a temporary key file.
pub struct TestDaemon {
    pub router: Router,
    pub service: Arc<KeyDistributionService>,
    pub clock: Arc<ManualClock>,
    pub key_path: PathBuf,
    _key_dir: TempDir,
}

impl TestDaemon {
    pub fn new() -> Self {
        Self::with_options(TestOptions::default())
    }

    pub fn with_options(options: TestOptions) -> Self {
        let key_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let key_path = key_dir.path().join("master.pub");
        if options.write_key {
            std::fs::write(&key_path, MASTER_PUB).expect("Failed to write key file");
        }

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("SALTKEY_ENROLLMENT_SECRET", SECRET.into());
        vars.insert("SALTKEY_MASTER_PUB_PATH", key_path.display().to_string());
        vars.insert("SALTKEY_PUBLIC_URL", "http://salt.example.com:8080".into());
        vars.insert(
            "SALTKEY_ENFORCE_TOKEN_IP",
            options.enforce_token_ip.to_string(),
        );
        if let Some(token) = options.admin_token {
            vars.insert("SALTKEY_ADMIN_TOKEN", token.into());
        }
        let config = Config::from_lookup(|key| vars.get(key).cloned()).expect("Invalid test config");

        let clock = Arc::new(ManualClock::at_unix(T0));
        let service = Arc::new(KeyDistributionService::from_config(&config, clock.clone()));

        let state = AppState::new(
            Arc::clone(&service),
            config.admin_token.as_deref(),
            options.trust_forwarded_for,
        );
        let router = http::router(
            state,
            KeyRequestRateLimiter::new(options.rate_limit_per_sec, options.rate_limit_burst)
                .with_trusted_forwarded_for(options.trust_forwarded_for),
            config.request_timeout,
        )
        .layer(MockConnectInfo(
            PEER.parse::<SocketAddr>().expect("valid peer address"),
        ));

        Self {
            router,
            service,
            clock,
            key_path,
            _key_dir: key_dir,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Sign a request with the daemon's enrollment secret.
    pub fn signed(&self, minion_id: &str, timestamp: i64, nonce: &str) -> EnrollmentRequest {
        EnrollmentRequest::sign(
            &EnrollmentSecret::new(SECRET.as_bytes()),
            minion_id,
            timestamp,
            nonce,
        )
    }

    /// `POST /salt-key/master-pub`
    pub async fn post_signed(&self, request: &EnrollmentRequest) -> TestResponse {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri("/salt-key/master-pub")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(request).unwrap()))
                .unwrap(),
        )
        .await
    }

    /// `GET /salt-key/master-pub/simple?token=...`
    pub async fn get_simple(&self, token: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(format!("/salt-key/master-pub/simple?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Admin request with the configured bearer token.
    pub async fn admin(&self, method: Method, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Issue a token through the admin API.
    pub async fn issue_token(&self, minion_id: &str, ttl_seconds: u64) -> InstallTokenGrant {
        let response = self
            .admin(
                Method::POST,
                &format!("/salt-key/install-token?minion_id={minion_id}&ttl_seconds={ttl_seconds}"),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        serde_json::from_slice(&response.body).expect("Failed to parse token grant")
    }
}
