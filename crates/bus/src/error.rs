use common::EntityId;
use record_store::Version;
use thiserror::Error;

use crate::Subject;

/// Errors reported by a bus client.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The bus refused or failed to acknowledge a publish.
    #[error("Publish to '{subject}' failed: {reason}")]
    PublishFailed { subject: Subject, reason: String },

    /// Subscribing to a subject failed.
    #[error("Subscription to '{subject}' failed: {reason}")]
    SubscriptionFailed { subject: Subject, reason: String },

    /// The bus connection has been closed.
    #[error("Bus is closed")]
    Closed,
}

/// Errors returned by [`EventPublisher`](crate::EventPublisher).
///
/// A publish error never undoes the write that produced the event.
#[derive(Debug, Error)]
pub enum PublishError {
    /// No acknowledgement arrived within the configured timeout.
    #[error("Publish of {subject} for {id}@{version} timed out after {timeout_ms}ms")]
    Timeout {
        subject: Subject,
        id: EntityId,
        version: Version,
        timeout_ms: u64,
    },

    /// The bus rejected the publish.
    #[error("Publish of {subject} for {id}@{version} rejected: {source}")]
    Rejected {
        subject: Subject,
        id: EntityId,
        version: Version,
        #[source]
        source: BusError,
    },

    /// The payload could not be serialized.
    #[error("Event payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
