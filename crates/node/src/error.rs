use bus::BusError;
use record_store::StoreError;
use thiserror::Error;

/// Failures while starting or running the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("tracing setup error: {0}")]
    Telemetry(#[from] tracing_subscriber::util::TryInitError),

    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
