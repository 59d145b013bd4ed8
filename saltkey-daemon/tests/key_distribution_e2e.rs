//! End-to-end tests for key distribution over the HTTP API.
//!
//! Each test builds the full router in-process with a manual clock and a
//! temporary master key file.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use base64::prelude::*;
use common::{TestDaemon, TestOptions, ADMIN_TOKEN, MASTER_PUB, T0};
use saltkey_daemon::http::{MasterPubResponse, TokenListResponse, CHECKSUM_HEADER, REQUEST_TIMEOUT_HEADER};
use saltkey_daemon::services::KeyRequestRateLimiter;
use saltkey_daemon::shutdown::ShutdownCoordinator;
use saltkey_daemon::sweeper::spawn_sweeper;
use sha2::{Digest, Sha256};

fn expected_checksum() -> String {
    hex::encode(Sha256::digest(MASTER_PUB))
}

// ============================================================================
// Signed requests
// ============================================================================

#[tokio::test]
async fn signed_request_returns_key_then_replay_is_rejected() {
    let daemon = TestDaemon::new();
    let request = daemon.signed("web-01", T0, "abc");

    let response = daemon.post_signed(&request).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());

    let body: MasterPubResponse = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(BASE64_STANDARD.decode(&body.master_pub).unwrap(), MASTER_PUB);
    assert_eq!(body.checksum, expected_checksum());
    assert_eq!(body.timestamp, T0);

    daemon.clock.advance(chrono::Duration::seconds(1));
    let replay = daemon.post_signed(&request).await;
    assert_eq!(replay.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn every_signed_rejection_looks_the_same() {
    let daemon = TestDaemon::new();

    let accepted = daemon.signed("web-01", T0, "n-1");
    assert_eq!(daemon.post_signed(&accepted).await.status, StatusCode::OK);

    let stale = daemon.signed("web-01", T0 - 400, "n-2");
    let replayed = accepted.clone();
    let mut bad_signature = daemon.signed("web-01", T0, "n-3");
    bad_signature.minion_id = "web-02".into();
    let malformed = daemon.signed("", T0, "n-4");

    let mut bodies = Vec::new();
    for request in [&stale, &replayed, &bad_signature, &malformed] {
        let response = daemon.post_signed(request).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        bodies.push(response.body);
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(bodies[0].as_ref(), br#"{"error":"request rejected"}"#);
}

#[tokio::test]
async fn undecodable_body_gets_generic_rejection() {
    let daemon = TestDaemon::new();

    let bodies = [
        r#"{"minion_id":"web-01","timestamp":"soon","nonce":"n","signature":"00"}"#,
        r#"{"minion_id":"web-01","timestamp":1700000000,"signature":"00"}"#,
        "not json at all",
    ];
    for body in bodies {
        let response = daemon
            .send(
                Request::builder()
                    .method(Method::POST)
                    .uri("/salt-key/master-pub")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "body: {body}");
        assert_eq!(response.body.as_ref(), br#"{"error":"request rejected"}"#);
    }

    let no_content_type = daemon
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/salt-key/master-pub")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(no_content_type.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rejected_signature_does_not_burn_nonce() {
    let daemon = TestDaemon::new();

    let mut forged = daemon.signed("web-01", T0, "shared-nonce");
    forged.signature = "00".repeat(32);
    assert_eq!(daemon.post_signed(&forged).await.status, StatusCode::FORBIDDEN);

    let genuine = daemon.signed("web-01", T0, "shared-nonce");
    assert_eq!(daemon.post_signed(&genuine).await.status, StatusCode::OK);
}

#[tokio::test]
async fn freshness_window_edges_are_inclusive() {
    let daemon = TestDaemon::new();

    let oldest = daemon.signed("web-01", T0 - 300, "edge-past");
    let newest = daemon.signed("web-01", T0 + 300, "edge-future");
    let beyond = daemon.signed("web-01", T0 + 301, "beyond");

    assert_eq!(daemon.post_signed(&oldest).await.status, StatusCode::OK);
    assert_eq!(daemon.post_signed(&newest).await.status, StatusCode::OK);
    assert_eq!(daemon.post_signed(&beyond).await.status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Install tokens
// ============================================================================

#[tokio::test]
async fn install_token_is_single_use() {
    let daemon = TestDaemon::new();
    let grant = daemon.issue_token("web-01", 600).await;

    assert_eq!(grant.minion_id, "web-01");
    assert_eq!(grant.ttl_seconds, 600);
    assert_eq!(
        grant.master_pub_url,
        format!(
            "http://salt.example.com:8080/salt-key/master-pub/simple?token={}",
            grant.token
        )
    );

    let first = daemon.get_simple(&grant.token).await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.text());
    assert_eq!(first.body.as_ref(), MASTER_PUB);
    assert_eq!(first.headers[CHECKSUM_HEADER], expected_checksum().as_str());
    assert!(first.headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let second = daemon.get_simple(&grant.token).await;
    assert_eq!(second.status, StatusCode::FORBIDDEN);
    assert_eq!(second.text(), "request rejected");
}

#[tokio::test]
async fn expired_and_unknown_tokens_are_rejected() {
    let daemon = TestDaemon::new();
    let grant = daemon.issue_token("web-01", 60).await;

    daemon.clock.advance(chrono::Duration::seconds(61));
    assert_eq!(daemon.get_simple(&grant.token).await.status, StatusCode::FORBIDDEN);

    assert_eq!(
        daemon.get_simple("not-a-real-token").await.status,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let daemon = TestDaemon::new();

    let response = daemon
        .send(
            Request::builder()
                .uri("/salt-key/master-pub/simple")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(daemon.get_simple("").await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn enforced_ip_pin_rejects_other_addresses() {
    let daemon = TestDaemon::with_options(TestOptions {
        enforce_token_ip: true,
        ..TestOptions::default()
    });

    let response = daemon
        .admin(
            Method::POST,
            "/salt-key/install-token?minion_id=web-01&bound_ip=198.51.100.7",
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let token = response.json()["token"].as_str().unwrap().to_string();

    // The harness peer is 192.0.2.10
    assert_eq!(daemon.get_simple(&token).await.status, StatusCode::FORBIDDEN);

    let grant = daemon.issue_token("web-02", 600).await;
    assert_eq!(daemon.get_simple(&grant.token).await.status, StatusCode::OK);
}

#[tokio::test]
async fn forwarded_for_is_honored_only_when_trusted() {
    for (trusted, expected) in [(true, StatusCode::OK), (false, StatusCode::FORBIDDEN)] {
        let daemon = TestDaemon::with_options(TestOptions {
            enforce_token_ip: true,
            trust_forwarded_for: trusted,
            ..TestOptions::default()
        });

        let response = daemon
            .admin(
                Method::POST,
                "/salt-key/install-token?minion_id=web-01&bound_ip=198.51.100.7",
            )
            .await;
        let token = response.json()["token"].as_str().unwrap().to_string();

        let response = daemon
            .send(
                Request::builder()
                    .uri(format!("/salt-key/master-pub/simple?token={token}"))
                    .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, expected, "trusted = {trusted}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_token_fetch_has_one_winner() {
    let daemon = Arc::new(TestDaemon::new());
    let grant = daemon.issue_token("web-01", 600).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let daemon = Arc::clone(&daemon);
            let token = grant.token.clone();
            tokio::spawn(async move { daemon.get_simple(&token).await.status })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            status => assert_eq!(status, StatusCode::FORBIDDEN),
        }
    }
    assert_eq!(ok, 1);
}

// ============================================================================
// Master key failures
// ============================================================================

#[tokio::test]
async fn key_read_failure_is_internal_and_keeps_token() {
    let daemon = TestDaemon::with_options(TestOptions {
        write_key: false,
        ..TestOptions::default()
    });
    let grant = daemon.issue_token("web-01", 600).await;

    let signed = daemon.post_signed(&daemon.signed("web-01", T0, "n-1")).await;
    assert_eq!(signed.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(signed.json()["error"], "internal error");

    let simple = daemon.get_simple(&grant.token).await;
    assert_eq!(simple.status, StatusCode::INTERNAL_SERVER_ERROR);

    // Failures are not cached, so the key is picked up once it appears
    std::fs::write(&daemon.key_path, MASTER_PUB).unwrap();
    let retry = daemon.get_simple(&grant.token).await;
    assert_eq!(retry.status, StatusCode::OK);
    assert_eq!(retry.body.as_ref(), MASTER_PUB);
}

#[tokio::test]
async fn reload_serves_new_key() {
    let daemon = TestDaemon::new();
    let first = daemon.post_signed(&daemon.signed("web-01", T0, "n-1")).await;
    assert_eq!(first.status, StatusCode::OK);

    std::fs::write(&daemon.key_path, b"rotated-key\n").unwrap();
    daemon.service.master_key().reload().await.unwrap();

    let second = daemon.post_signed(&daemon.signed("web-01", T0, "n-2")).await;
    let body: MasterPubResponse = serde_json::from_slice(&second.body).unwrap();
    assert_eq!(BASE64_STANDARD.decode(&body.master_pub).unwrap(), b"rotated-key\n");
}

// ============================================================================
// Admin API
// ============================================================================

#[tokio::test]
async fn admin_requires_bearer_token() {
    let daemon = TestDaemon::new();

    let missing = daemon
        .send(
            Request::builder()
                .uri("/salt-key/install-tokens")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.headers[header::WWW_AUTHENTICATE], "Bearer");

    let wrong = daemon
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/salt-key/install-token?minion_id=web-01")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}-nope"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json()["code"], "unauthorized");
    assert!(daemon.service.list_tokens().is_empty());
}

#[tokio::test]
async fn admin_disabled_without_configured_token() {
    let daemon = TestDaemon::with_options(TestOptions {
        admin_token: None,
        ..TestOptions::default()
    });

    let response = daemon.admin(Method::GET, "/salt-key/install-tokens").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn issue_rejects_bad_input() {
    let daemon = TestDaemon::new();

    let no_minion = daemon.admin(Method::POST, "/salt-key/install-token").await;
    assert_eq!(no_minion.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_minion.json()["code"], "invalid_request");

    let bad_ip = daemon
        .admin(
            Method::POST,
            "/salt-key/install-token?minion_id=web-01&bound_ip=not-an-ip",
        )
        .await;
    assert_eq!(bad_ip.status, StatusCode::BAD_REQUEST);

    let pipe = daemon
        .admin(Method::POST, "/salt-key/install-token?minion_id=web%7C01")
        .await;
    assert_eq!(pipe.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn issue_uses_default_ttl_and_clamps() {
    let daemon = TestDaemon::new();

    let response = daemon
        .admin(Method::POST, "/salt-key/install-token?minion_id=web-01")
        .await;
    assert_eq!(response.json()["ttl_seconds"], 3600);

    let clamped = daemon.issue_token("web-02", 7 * 24 * 3600).await;
    assert_eq!(clamped.ttl_seconds, 24 * 3600);
}

#[tokio::test]
async fn list_masks_tokens_and_revoke_removes_them() {
    let daemon = TestDaemon::new();
    let older = daemon.issue_token("web-01", 600).await;
    daemon.clock.advance(chrono::Duration::seconds(5));
    let newer = daemon.issue_token("web-02", 600).await;

    let response = daemon.admin(Method::GET, "/salt-key/install-tokens").await;
    assert_eq!(response.status, StatusCode::OK);
    let list: TokenListResponse = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(list.total, 2);
    assert_eq!(list.tokens[0].minion_id, "web-02");
    assert_eq!(list.tokens[1].minion_id, "web-01");
    assert_eq!(list.tokens[0].token, format!("{}...", &newer.token[..8]));
    assert!(!response.text().contains(&older.token));
    assert!(!response.text().contains(&newer.token));

    let revoke_uri = format!("/salt-key/install-token/{}", older.token);
    let revoked = daemon.admin(Method::DELETE, &revoke_uri).await;
    assert_eq!(revoked.status, StatusCode::OK);
    assert_eq!(revoked.json()["message"], "token revoked");

    assert_eq!(daemon.get_simple(&older.token).await.status, StatusCode::FORBIDDEN);

    let again = daemon.admin(Method::DELETE, &revoke_uri).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
    assert_eq!(again.json()["code"], "token_not_found");
}

// ============================================================================
// Ambient routes and middleware
// ============================================================================

#[tokio::test]
async fn healthz_is_open() {
    let daemon = TestDaemon::with_options(TestOptions {
        rate_limit_per_sec: 1,
        rate_limit_burst: 1,
        ..TestOptions::default()
    });

    for _ in 0..3 {
        let response = daemon
            .send(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["status"], "ok");
    }
}

#[tokio::test]
async fn minion_routes_are_rate_limited() {
    let daemon = TestDaemon::with_options(TestOptions {
        rate_limit_per_sec: 1,
        rate_limit_burst: 2,
        ..TestOptions::default()
    });

    assert_eq!(daemon.get_simple("x").await.status, StatusCode::FORBIDDEN);
    assert_eq!(daemon.get_simple("y").await.status, StatusCode::FORBIDDEN);
    assert_eq!(
        daemon.get_simple("z").await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    // Admin routes draw from no limiter
    let response = daemon.admin(Method::GET, "/salt-key/install-tokens").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_budgets_are_per_client() {
    let daemon = TestDaemon::with_options(TestOptions {
        rate_limit_per_sec: 1,
        rate_limit_burst: 1,
        trust_forwarded_for: true,
        ..TestOptions::default()
    });

    let from = |client: &str| {
        Request::builder()
            .uri("/salt-key/master-pub/simple?token=unknown")
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(daemon.send(from("203.0.113.9")).await.status, StatusCode::FORBIDDEN);
    assert_eq!(
        daemon.send(from("203.0.113.9")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different minion still gets through while the noisy one is throttled
    assert_eq!(daemon.send(from("198.51.100.20")).await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn request_timeout_header_is_accepted() {
    let daemon = TestDaemon::new();
    let response = daemon
        .send(
            Request::builder()
                .uri("/healthz")
                .header(REQUEST_TIMEOUT_HEADER, "5000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

// ============================================================================
// Background sweeping
// ============================================================================

#[tokio::test]
async fn sweeper_purges_expired_entries_and_stops_on_shutdown() {
    let daemon = TestDaemon::new();
    daemon.issue_token("web-01", 1).await;
    assert_eq!(
        daemon.post_signed(&daemon.signed("web-01", T0, "n-1")).await.status,
        StatusCode::OK
    );

    daemon.clock.advance(chrono::Duration::seconds(3600));

    let coordinator = ShutdownCoordinator::new();
    let handle = spawn_sweeper(
        Arc::clone(&daemon.service),
        KeyRequestRateLimiter::default(),
        Duration::from_millis(20),
        coordinator.signal(),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let leftover = daemon.service.sweep();
    assert_eq!(leftover.tokens, 0);
    assert_eq!(leftover.nonces, 0);

    coordinator.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
