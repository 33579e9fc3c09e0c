//! Node entry point.

use node::{App, Config, NodeError};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> Result<(), NodeError> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("received SIGINT, starting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("received SIGINT, starting graceful shutdown");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    node::telemetry::init(&config)?;

    // 2. Serve Prometheus metrics
    let addr = config
        .socket_addr()
        .map_err(|e| NodeError::Config(format!("{}: {e}", config.addr())))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "serving metrics");

    // 3. Start services and consumers
    let app = App::start(&config).await?;

    // 4. Run until signalled
    shutdown_signal().await?;
    app.shutdown().await;

    Ok(())
}
