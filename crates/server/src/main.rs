//! waypost server entry point.
//!
//! Loads configuration, opens the cache database, registers the configured
//! cache version and serves the offline cache manager over MCP on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use waypost_client::{FetchClient, FetchConfig, Network, RegisterOutcome, Registration};
use waypost_core::{AppConfig, CacheDb};

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let worker = config.worker_config().context("building worker configuration")?;
    let origin = worker.origin().clone();

    tracing::info!(
        db_path = %config.db_path.display(),
        origin = %origin,
        version = worker.version(),
        "Starting waypost server on stdio transport"
    );

    let cache = CacheDb::open(&config.db_path).await.context("opening cache database")?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from_app_config(&config)?)?);
    let registration = Arc::new(Registration::new(cache.clone(), network));

    match registration.register(worker).await {
        Ok(RegisterOutcome::Waiting { install }) => {
            tracing::info!(version = %install.version, "installed version is waiting");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "initial registration failed; requests pass through until sw_update succeeds"),
    }

    let handler = handler::WaypostServer::new(Arc::clone(&registration), origin);
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    registration.wait_until_idle().await;
    cache.close().await?;

    Ok(())
}
