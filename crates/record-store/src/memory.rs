use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    EntityId, RecordQuery, RecordUpdate, Result, StoreError, StoredRecord, Version,
    record::validate_for_create, store::RecordStore,
};

/// In-memory record store.
///
/// Used by tests and by single-process deployments. The check-and-set in
/// [`compare_and_swap`](RecordStore::compare_and_swap) happens under one
/// write guard, so concurrent writers in the same process serialize per
/// store.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<EntityId, StoredRecord>>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Removes every record.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: StoredRecord) -> Result<StoredRecord> {
        validate_for_create(&record)?;

        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: EntityId) -> Result<Option<StoredRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        id: EntityId,
        expected: Version,
        update: RecordUpdate,
    ) -> Result<StoredRecord> {
        let mut records = self.records.write().await;
        let current = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if current.version != expected {
            return Err(StoreError::ConcurrencyConflict {
                id,
                expected,
                actual: current.version,
            });
        }

        *current = current.advanced(update, Utc::now());
        Ok(current.clone())
    }

    async fn query(&self, query: RecordQuery) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        Ok(self.records.read().await.get(&id).map(|r| r.version))
    }
}
