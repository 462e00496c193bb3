//! Runnable TCP + WebSocket echo service built on `netcore`.
//!
//! Binds both listeners from the `NETCORE_*` environment variables (see
//! `netcore::ServiceConfig::from_env`) and echoes every inbound frame back
//! to its sender. Shuts down cleanly on Ctrl+C or SIGTERM.

use netcore::{ConnectionContext, HandlerError, Service, ServiceConfig, ServiceHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct EchoHandler;

impl ServiceHandler for EchoHandler {
    async fn on_connected(&self, ctx: &Arc<ConnectionContext>) -> Result<(), HandlerError> {
        tracing::info!(fd = ctx.fd(), remote = %ctx.remote_addr(), protocol = ?ctx.protocol(), "client connected");
        Ok(())
    }

    async fn on_disconnected(&self, ctx: &Arc<ConnectionContext>) {
        tracing::info!(fd = ctx.fd(), "client disconnected");
    }

    async fn on_data(&self, ctx: &Arc<ConnectionContext>, payload: &[u8]) -> Result<(), HandlerError> {
        ctx.write(payload).map_err(|e| Box::new(e) as HandlerError)
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config = ServiceConfig::from_env();
    let service = Service::new(config, EchoHandler)?;

    let shutdown = tokio_graceful::Shutdown::default();
    let run_service = service.clone();
    shutdown.spawn_task_fn(|guard| async move {
        let watched = run_service.clone();
        tokio::spawn(async move {
            guard.cancelled().await;
            watched.stop();
        });
        if let Err(err) = run_service.run().await {
            tracing::error!(error = %err, "service exited with an error");
        }
    });

    shutdown.shutdown_with_limit(Duration::from_secs(10)).await?;
    tracing::info!("echo gateway stopped");
    Ok(())
}
