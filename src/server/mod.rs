//! TCP accept loop and per-connection HTTP handling.

pub mod handler;

pub use handler::Handler;

use crate::auth::TokenAuthenticator;
use crate::config::ServerConfig;
use crate::health::HealthCheck;
use crate::redirect::RedirectService;
use crate::storage::Buckets;
use crate::telemetry::Telemetry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long open connections get to finish after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a request handler needs, shared by all connections.
pub struct AppState {
    pub redirects: RedirectService,
    pub auth: TokenAuthenticator,
    pub health: HealthCheck,
    pub telemetry: Arc<Telemetry>,
    pub public_scheme: String,
    pub max_body_bytes: usize,
    pub read_timeout: Duration,
}

impl AppState {
    pub fn new(buckets: &Buckets, config: &ServerConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            redirects: RedirectService::new(buckets.redirects.clone()),
            auth: TokenAuthenticator::new(buckets.api_keys.clone()),
            health: HealthCheck::new(buckets.health_checks.clone()),
            telemetry,
            public_scheme: config.public_scheme.clone(),
            max_body_bytes: config.max_body_bytes,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

/// Accept connections until `shutdown` resolves, one task per connection.
///
/// After shutdown, connections still open get [`SHUTDOWN_GRACE`] to finish
/// before they are aborted.
pub async fn run<F>(listener: TcpListener, handler: Handler, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (mut socket, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let handler = handler.clone();
                connections.spawn(async move {
                    debug!("New connection from {}", addr);
                    if let Err(e) = handler.handle_stream(&mut socket).await {
                        error!("Error handling connection from {}: {}", addr, e);
                    }
                });
            }
            // Reap finished connections so the set does not grow unbounded.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Aborting {} open connection(s)", connections.len());
        connections.abort_all();
    }
    Ok(())
}
