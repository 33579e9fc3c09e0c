//! Replication error types.

use bus::{BusError, Subject};
use common::EntityId;
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur while applying events to replicas.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The message or its payload could not be decoded.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The handler does not consume this subject.
    #[error("Unexpected subject '{subject}' for entity {id}")]
    UnexpectedSubject { subject: Subject, id: EntityId },

    /// The handler failed to apply an event.
    #[error("Handler error: {0}")]
    Domain(#[from] DomainError),

    /// Subscribing or receiving failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl ReplicationError {
    /// True for events that can never be applied, however often they are
    /// redelivered.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ReplicationError::Malformed(_) | ReplicationError::UnexpectedSubject { .. }
        )
    }
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;
