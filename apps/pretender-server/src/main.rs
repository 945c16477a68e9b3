//! PretenderDB Server — DynamoDB wire-protocol emulation over a SQL backend.
//!
//! This binary wires a Postgres connection pool, the DynamoDB semantic
//! translation layer, and the `awsJson1_0` HTTP adapter into a running
//! server, and starts the background TTL sweep and stream retention
//! pruning workers alongside it.
//!
//! # Usage
//!
//! ```text
//! DATABASE_URL=postgres://localhost:5432/pretenderdb GATEWAY_LISTEN=0.0.0.0:4566 pretender-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:4566` | Bind address |
//! | `DATABASE_URL` | `postgres://localhost:5432/pretenderdb` | Postgres connection string |
//! | `DATABASE_USER` / `DATABASE_PASSWORD` | *(unset)* | Folded into `DATABASE_URL` when it carries no credentials |
//! | `DATABASE_MAX_CONNECTIONS` | `10` | Pool size |
//! | `DYNAMODB_SKIP_SIGNATURE_VALIDATION` | `true` | Skip SigV4 verification |
//! | `TTL_SWEEP_INTERVAL_SECONDS` | `60` | TTL background sweep period |
//! | `TTL_BATCH_SIZE` | `250` | Max items expired per table per sweep pass |
//! | `STREAM_RETENTION_SECONDS` | `86400` | Stream record retention window |
//! | `STREAM_PRUNE_INTERVAL_SECONDS` | `300` | Stream retention pruning period |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pretender_dynamodb_core::clock::{Clock, SystemClock};
use pretender_dynamodb_core::config::DynamoDBConfig;
use pretender_dynamodb_core::db;
use pretender_dynamodb_core::handler::PretenderDynamoDBHandler;
use pretender_dynamodb_core::provider::PretenderDynamoDB;
use pretender_dynamodb_core::state::DynamoDBServiceState;
use pretender_dynamodb_core::streams::spawn_retention_pruner;
use pretender_dynamodb_core::ttl::spawn_ttl_sweeper;
use pretender_dynamodb_http::service::{DynamoDBHttpConfig, DynamoDBHttpService};

/// Server version reported in health check responses.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Build the [`DynamoDBHttpConfig`] from the [`DynamoDBConfig`].
fn build_http_config(config: &DynamoDBConfig) -> DynamoDBHttpConfig {
    let credential_provider = build_credential_provider();

    DynamoDBHttpConfig {
        skip_signature_validation: config.skip_signature_validation,
        region: config.default_region.clone(),
        credential_provider,
    }
}

/// Build a credential provider from `ACCESS_KEY` / `SECRET_KEY` environment
/// variables (used by local test harnesses that exercise SigV4).
fn build_credential_provider() -> Option<Arc<dyn pretender_auth::CredentialProvider>> {
    use pretender_auth::StaticCredentialProvider;

    let access_key = std::env::var("ACCESS_KEY")
        .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
        .ok()?;
    let secret_key = std::env::var("SECRET_KEY")
        .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
        .ok()?;

    info!(
        access_key = %access_key,
        "configured credential provider from environment"
    );

    Some(Arc::new(StaticCredentialProvider::new(vec![(
        access_key, secret_key,
    )])))
}

/// Run the accept loop, serving connections until a shutdown signal is received.
///
/// `worker_shutdown` is notified alongside the HTTP drain so the TTL and
/// stream-retention background workers stop at the same time.
async fn serve(
    listener: TcpListener,
    service: DynamoDBHttpService<PretenderDynamoDBHandler>,
    worker_shutdown: watch::Sender<bool>,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    // Tell the TTL/stream-pruning workers to finish their current pass and stop.
    let _ = worker_shutdown.send(true);

    // Wait for in-flight requests to complete.
    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Perform a health check by connecting to the server and requesting the health endpoint.
///
/// Exits with code 0 if the response is 200 OK, 1 otherwise.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request =
        format!("GET /_localstack/health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

/// Read the server listen address from the environment.
fn gateway_listen_addr() -> String {
    std::env::var("GATEWAY_LISTEN").unwrap_or_else(|_| "0.0.0.0:4566".to_string())
}

/// Read the log level from the environment.
fn log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let listen_addr = gateway_listen_addr();

    // Handle --health-check flag for Docker HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let addr = listen_addr.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&log_level())?;

    let config = DynamoDBConfig::from_env();

    info!(
        database_url = %config.database_url,
        ttl_sweep_interval = ?config.ttl_sweep_interval,
        stream_retention = ?config.stream_retention,
        version = VERSION,
        "starting PretenderDB server",
    );

    let pool = db::create_pool(
        &config.effective_database_url(),
        config.database_max_connections,
    )
    .await
    .context("failed to connect to the Postgres backend")?;
    db::run_migrations(&pool)
        .await
        .context("failed to apply schema migrations")?;

    let state = Arc::new(DynamoDBServiceState::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = Arc::new(PretenderDynamoDB::new(
        Arc::clone(&state),
        config.clone(),
        Arc::clone(&clock),
    ));
    let handler = Arc::new(PretenderDynamoDBHandler::new(provider));
    let http_config = build_http_config(&config);
    let service = DynamoDBHttpService::new(handler, http_config);

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let ttl_task = spawn_ttl_sweeper(
        Arc::clone(&state),
        Arc::clone(&clock),
        config.ttl_sweep_interval,
        config.ttl_batch_size,
        config.ttl_user_identity_principal.clone(),
        worker_shutdown_rx.clone(),
    );
    let prune_task = spawn_retention_pruner(
        pool,
        config.stream_retention,
        config.stream_prune_interval,
        Arc::clone(&clock),
        worker_shutdown_rx,
    );

    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid bind address: {listen_addr}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, version = VERSION, "listening for connections");

    serve(listener, service, worker_shutdown_tx).await?;

    ttl_task.await.ok();
    prune_task.await.ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_http_config_from_dynamodb_config() {
        let config = DynamoDBConfig::from_env();
        let http_config = build_http_config(&config);

        assert_eq!(
            http_config.skip_signature_validation,
            config.skip_signature_validation
        );
        assert_eq!(http_config.region, config.default_region);
    }

    #[test]
    fn test_should_default_gateway_listen_addr() {
        // SAFETY: test-only process-wide env mutation, no concurrent access in this test binary.
        unsafe {
            std::env::remove_var("GATEWAY_LISTEN");
        }
        assert_eq!(gateway_listen_addr(), "0.0.0.0:4566");
    }

    #[test]
    fn test_should_default_log_level() {
        // SAFETY: test-only process-wide env mutation, no concurrent access in this test binary.
        unsafe {
            std::env::remove_var("LOG_LEVEL");
        }
        assert_eq!(log_level(), "info");
    }
}
