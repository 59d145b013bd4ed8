//! saltkey daemon - master public key distribution for Salt minions
//!
//! Serves the HTTP API minions use to fetch the master public key, and a
//! helper to produce signed requests for bootstrap scripts.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use saltkey_auth::{generate_nonce, Clock, EnrollmentRequest, EnrollmentSecret, SystemClock};
use saltkey_daemon::http::{self, AppState};
use saltkey_daemon::services::{KeyDistributionService, KeyRequestRateLimiter};
use saltkey_daemon::shutdown::{ShutdownCoordinator, ShutdownSignal};
use saltkey_daemon::sweeper::{spawn_sweeper, sweep_interval};
use saltkey_daemon::Config;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// saltkey daemon - Salt master public key distribution
#[derive(Parser)]
#[command(name = "saltkey-daemon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default if no command given)
    Serve,

    /// Print a signed request body for POST /salt-key/master-pub
    Sign {
        /// Minion id to sign for
        #[arg(long)]
        minion_id: String,

        /// Enrollment secret
        #[arg(long, env = "SALTKEY_ENROLLMENT_SECRET", hide_env_values = true)]
        secret: String,

        /// Unix timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Nonce (defaults to 16 random bytes, hex)
        #[arg(long)]
        nonce: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Sign {
            minion_id,
            secret,
            timestamp,
            nonce,
        }) => cmd_sign(&minion_id, secret, timestamp, nonce),
        Some(Commands::Serve) | None => cmd_serve().await,
    }
}

/// Print a signed enrollment request as JSON.
fn cmd_sign(
    minion_id: &str,
    secret: String,
    timestamp: Option<i64>,
    nonce: Option<String>,
) -> anyhow::Result<()> {
    let secret = EnrollmentSecret::new(secret.into_bytes());
    let timestamp = timestamp.unwrap_or_else(|| SystemClock.unix_seconds());
    let nonce = nonce.unwrap_or_else(generate_nonce);

    let request = EnrollmentRequest::sign(&secret, minion_id, timestamp, &nonce);
    println!(
        "{}",
        serde_json::to_string(&request).context("failed to encode request")?
    );
    Ok(())
}

/// Start the daemon server.
async fn cmd_serve() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(config = ?config, "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(KeyDistributionService::from_config(&config, clock));

    // Load eagerly so a bad path shows up at startup. Not fatal: the key is
    // retried on the first request.
    if let Err(e) = service.master_key().read().await {
        tracing::warn!(error = %e, "Master public key not available yet");
    }

    let limiter = KeyRequestRateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst)
        .with_trusted_forwarded_for(config.trust_forwarded_for);

    let coordinator = ShutdownCoordinator::new();
    let sweeper = spawn_sweeper(
        Arc::clone(&service),
        limiter.clone(),
        sweep_interval(config.freshness_window),
        coordinator.signal(),
    );
    spawn_reload_on_hangup(Arc::clone(&service), coordinator.signal())?;

    if config.admin_token.is_none() {
        tracing::warn!("SALTKEY_ADMIN_TOKEN not set, admin API is disabled");
    }

    let state = AppState::new(
        Arc::clone(&service),
        config.admin_token.as_deref(),
        config.trust_forwarded_for,
    );
    let app = http::router(state, limiter, config.request_timeout);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(
        addr = %config.listen_addr,
        public_url = %config.public_url,
        "saltkey daemon starting"
    );

    let shutdown = coordinator.signal();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.recv());

    let server_task = tokio::spawn(async move { server.await });

    wait_for_termination().await?;
    coordinator.shutdown();

    let result = server_task.await.context("server task panicked")?;
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task failed");
    }

    match result {
        Ok(()) => {
            tracing::info!("Daemon shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Daemon shutdown with error");
            Err(e).context("server error")
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_termination() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
    Ok(())
}

/// Reload the master public key on SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup(
    service: Arc<KeyDistributionService>,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        let stop = shutdown.recv();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match service.master_key().reload().await {
                        Ok(key) => tracing::info!(
                            checksum = %key.checksum_hex(),
                            "Master public key reloaded"
                        ),
                        Err(e) => tracing::error!(
                            error = %e,
                            "Master public key reload failed, keeping previous key"
                        ),
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(
    _service: Arc<KeyDistributionService>,
    _shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    Ok(())
}
