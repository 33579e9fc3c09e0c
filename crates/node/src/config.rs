//! Node configuration loaded from environment variables.

use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use bus::publisher::DEFAULT_PUBLISH_TIMEOUT;
use domain::services::orders::DEFAULT_EXPIRATION;
use domain::services::payments::DEFAULT_CURRENCY;
use replication::DEFAULT_BUFFER_LIMIT;

/// How log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: metrics listener address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` or `pretty` (default `pretty`)
/// - `TICKETS_DATABASE_URL`, `ORDERS_DATABASE_URL`, `PAYMENTS_DATABASE_URL`:
///   one Postgres database per service; a service without one keeps its
///   records in memory
/// - `PUBLISH_TIMEOUT_MS`: bus acknowledgement deadline (default 2000)
/// - `ORDER_EXPIRATION_SECS`: how long an order holds its ticket (default 900)
/// - `PAYMENT_CURRENCY`: currency charged (default `inr`)
/// - `REPLICA_BUFFER_LIMIT`: out-of-order events held per entity (default 64)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub tickets_database_url: Option<String>,
    pub orders_database_url: Option<String>,
    pub payments_database_url: Option<String>,
    pub publish_timeout: Duration,
    pub order_expiration: chrono::Duration,
    pub payment_currency: String,
    pub replica_buffer_limit: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let url = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            tickets_database_url: url("TICKETS_DATABASE_URL"),
            orders_database_url: url("ORDERS_DATABASE_URL"),
            payments_database_url: url("PAYMENTS_DATABASE_URL"),
            publish_timeout: number("PUBLISH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            order_expiration: number("ORDER_EXPIRATION_SECS")
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(defaults.order_expiration),
            payment_currency: lookup("PAYMENT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.payment_currency),
            replica_buffer_limit: number("REPLICA_BUFFER_LIMIT")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.replica_buffer_limit),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the bind address for the metrics listener.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.addr().parse()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            tickets_database_url: None,
            orders_database_url: None,
            payments_database_url: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            order_expiration: DEFAULT_EXPIRATION,
            payment_currency: DEFAULT_CURRENCY.to_string(),
            replica_buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}
