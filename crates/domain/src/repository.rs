//! Versioned persistence for entities.

use std::marker::PhantomData;

use common::{ActorId, EntityId};
use record_store::{RecordQuery, RecordStore, RecordStoreExt, StoredRecord, Version};

use crate::entity::{Entity, Versioned};
use crate::error::{DomainError, Result};

/// Loads and writes one entity type through a record store.
///
/// Every write names the version it expects to replace. The mutation runs on
/// a copy of the current entity; if it fails, or the stored version moved on,
/// nothing is persisted.
pub struct Repository<S, E>
where
    S: RecordStore,
    E: Entity,
{
    store: S,
    _phantom: PhantomData<E>,
}

impl<S, E> Clone for Repository<S, E>
where
    S: RecordStore + Clone,
    E: Entity,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, E> Repository<S, E>
where
    S: RecordStore,
    E: Entity,
{
    /// Creates a new repository over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists a new entity at version 0.
    pub async fn create(&self, id: EntityId, owner: ActorId, entity: E) -> Result<Versioned<E>> {
        let record = StoredRecord::builder()
            .id(id)
            .entity_type(E::entity_type())
            .owner(owner)
            .lock(entity.lock())
            .status(entity.status())
            .state(&entity)?
            .build()?;

        let record = self.store.create(record).await?;
        metrics::counter!("records_written_total", "entity_type" => E::entity_type())
            .increment(1);
        Versioned::from_record(record)
    }

    /// Loads an entity, returning None if it doesn't exist.
    pub async fn find(&self, id: EntityId) -> Result<Option<Versioned<E>>> {
        self.store
            .get_typed(id, E::entity_type())
            .await?
            .map(Versioned::from_record)
            .transpose()
    }

    /// Loads an entity, failing with `NotFound` if it doesn't exist.
    pub async fn load(&self, id: EntityId) -> Result<Versioned<E>> {
        self.find(id).await?.ok_or(DomainError::NotFound(id))
    }

    /// Returns the stored version of an entity.
    pub async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        Ok(self.find(id).await?.map(|found| found.version))
    }

    /// Applies `mutation` to the entity if it is still at `expected`.
    ///
    /// On success the entity is stored at `expected + 1` and returned.
    pub async fn write<F>(&self, id: EntityId, expected: Version, mutation: F) -> Result<Versioned<E>>
    where
        F: FnOnce(&mut E) -> Result<()> + Send,
    {
        let current = self.load(id).await?;
        self.write_from(current, expected, mutation).await
    }

    /// Applies `mutation` to whatever version is currently stored.
    pub async fn update<F>(&self, id: EntityId, mutation: F) -> Result<Versioned<E>>
    where
        F: FnOnce(&mut E) -> Result<()> + Send,
    {
        let current = self.load(id).await?;
        let expected = current.version;
        self.write_from(current, expected, mutation).await
    }

    /// Like [`update`](Self::update), but re-reads and tries again on a
    /// concurrency conflict, up to `attempts` times in total.
    pub async fn update_retrying<F>(
        &self,
        id: EntityId,
        attempts: usize,
        mut mutation: F,
    ) -> Result<Versioned<E>>
    where
        F: FnMut(&mut E) -> Result<()> + Send,
    {
        let mut attempt = 1;
        loop {
            match self.update(id, &mut mutation).await {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    tracing::debug!(entity_id = %id, attempt, "Write conflicted, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Stores `entity` as exactly `version`, replaying a remote change.
    ///
    /// Version 0 creates the record; any later version must directly follow
    /// the stored one.
    pub async fn sync(
        &self,
        id: EntityId,
        owner: ActorId,
        version: Version,
        entity: E,
    ) -> Result<Versioned<E>> {
        if version == Version::initial() {
            return self.create(id, owner, entity).await;
        }

        let expected = Version::new(version.as_i64() - 1);
        self.write(id, expected, move |current| {
            *current = entity;
            Ok(())
        })
        .await
    }

    /// Returns entities of this type matching `query`.
    pub async fn query(&self, mut query: RecordQuery) -> Result<Vec<Versioned<E>>> {
        query.entity_type = Some(E::entity_type().to_string());
        self.store
            .query(query)
            .await?
            .into_iter()
            .map(Versioned::from_record)
            .collect()
    }

    async fn write_from<F>(
        &self,
        current: Versioned<E>,
        expected: Version,
        mutation: F,
    ) -> Result<Versioned<E>>
    where
        F: FnOnce(&mut E) -> Result<()> + Send,
    {
        let id = current.id;
        if current.version != expected {
            metrics::counter!("record_conflicts_total", "entity_type" => E::entity_type())
                .increment(1);
            return Err(DomainError::Concurrency {
                id,
                expected,
                actual: current.version,
            });
        }

        let mut entity = current.entity;
        mutation(&mut entity)?;

        let record = match self
            .store
            .compare_and_swap(id, expected, entity.to_update()?)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if e.is_conflict() {
                    metrics::counter!("record_conflicts_total", "entity_type" => E::entity_type())
                        .increment(1);
                }
                return Err(e.into());
            }
        };

        metrics::counter!("records_written_total", "entity_type" => E::entity_type())
            .increment(1);
        Versioned::from_record(record)
    }
}
