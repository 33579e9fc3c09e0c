use std::sync::Arc;

use async_trait::async_trait;

use crate::{EntityId, RecordQuery, RecordUpdate, Result, StoreError, StoredRecord, Version};

/// Core trait for record store implementations.
///
/// A record store persists the current state of each entity together with
/// its version. All implementations must be thread-safe (Send + Sync) and
/// must make [`compare_and_swap`](RecordStore::compare_and_swap) atomic with
/// respect to every other writer, including other processes sharing the
/// same backend.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record at version 0.
    ///
    /// Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, record: StoredRecord) -> Result<StoredRecord>;

    /// Fetches a record by id.
    async fn get(&self, id: EntityId) -> Result<Option<StoredRecord>>;

    /// Replaces the mutable contents of a record if, and only if, its stored
    /// version equals `expected`.
    ///
    /// On success the record moves to `expected + 1` and the full updated
    /// record is returned. On mismatch nothing is written and
    /// `ConcurrencyConflict` is returned.
    async fn compare_and_swap(
        &self,
        id: EntityId,
        expected: Version,
        update: RecordUpdate,
    ) -> Result<StoredRecord>;

    /// Retrieves records matching a query.
    async fn query(&self, query: RecordQuery) -> Result<Vec<StoredRecord>>;

    /// Gets the current version of a record, or None if it doesn't exist.
    async fn current_version(&self, id: EntityId) -> Result<Option<Version>>;
}

/// A record store shared across services and tasks.
pub type SharedRecordStore = Arc<dyn RecordStore>;

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn create(&self, record: StoredRecord) -> Result<StoredRecord> {
        (**self).create(record).await
    }

    async fn get(&self, id: EntityId) -> Result<Option<StoredRecord>> {
        (**self).get(id).await
    }

    async fn compare_and_swap(
        &self,
        id: EntityId,
        expected: Version,
        update: RecordUpdate,
    ) -> Result<StoredRecord> {
        (**self).compare_and_swap(id, expected, update).await
    }

    async fn query(&self, query: RecordQuery) -> Result<Vec<StoredRecord>> {
        (**self).query(query).await
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        (**self).current_version(id).await
    }
}

/// Extension trait providing convenience methods for record stores.
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    /// Fetches a record, failing with `NotFound` if it is absent.
    async fn load(&self, id: EntityId) -> Result<StoredRecord> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Fetches a record of a specific entity type.
    ///
    /// A record of another type under the same id is a `TypeMismatch`.
    async fn get_typed(&self, id: EntityId, entity_type: &str) -> Result<Option<StoredRecord>> {
        match self.get(id).await? {
            Some(record) if record.entity_type != entity_type => Err(StoreError::TypeMismatch {
                id,
                expected: entity_type.to_string(),
                actual: record.entity_type,
            }),
            other => Ok(other),
        }
    }

    /// Checks if a record exists.
    async fn exists(&self, id: EntityId) -> Result<bool> {
        Ok(self.current_version(id).await?.is_some())
    }
}

// Blanket implementation for all RecordStore implementations
impl<T: RecordStore + ?Sized> RecordStoreExt for T {}
