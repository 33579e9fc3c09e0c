//! Core entity trait and the versioned view of a stored entity.

use chrono::{DateTime, Utc};
use common::{ActorId, EntityId};
use record_store::{RecordUpdate, StoredRecord, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// Trait for entities persisted in a record store.
///
/// The entity body is stored as JSON; status and lock are also exposed so the
/// store can filter on them and the state gate can read claims without
/// knowing the concrete type.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Returns the entity type name.
    ///
    /// Used to tag records and to reject loading one type as another.
    fn entity_type() -> &'static str;

    /// Returns the status name stored alongside the body.
    fn status(&self) -> &'static str;

    /// Returns the entity currently holding a claim on this one.
    fn lock(&self) -> Option<EntityId> {
        None
    }

    /// Builds the store update carrying this entity's current contents.
    fn to_update(&self) -> Result<RecordUpdate, DomainError> {
        Ok(RecordUpdate::new(
            self.lock(),
            self.status(),
            serde_json::to_value(self)?,
        ))
    }
}

/// An entity together with the metadata of the record it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<E> {
    pub id: EntityId,
    pub version: Version,
    pub owner: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub entity: E,
}

impl<E: Entity> Versioned<E> {
    /// Decodes a stored record.
    pub fn from_record(record: StoredRecord) -> Result<Self, DomainError> {
        let entity = record.state_as::<E>()?;
        Ok(Self {
            id: record.id,
            version: record.version,
            owner: record.owner,
            created_at: record.created_at,
            updated_at: record.updated_at,
            entity,
        })
    }

    /// Returns true if `actor` created the entity.
    pub fn is_owned_by(&self, actor: ActorId) -> bool {
        self.owner == actor
    }
}

impl<E> std::ops::Deref for Versioned<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}
