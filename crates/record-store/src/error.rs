use thiserror::Error;

use crate::{EntityId, Version};

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The expected version did not match the stored version.
    #[error("Concurrency conflict for record {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        id: EntityId,
        expected: Version,
        actual: Version,
    },

    /// No record exists with this id.
    #[error("Record not found: {0}")]
    NotFound(EntityId),

    /// A record with this id already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(EntityId),

    /// The stored record belongs to a different entity type than requested.
    #[error("Record {id} has type {actual}, expected {expected}")]
    TypeMismatch {
        id: EntityId,
        expected: String,
        actual: String,
    },

    /// The record failed structural validation before reaching storage.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if this is an optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
