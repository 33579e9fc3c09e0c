use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, EntityId, StoreError};

/// Version number of a stored record, used for optimistic concurrency control.
///
/// A freshly created record is at version 0. Each accepted write moves it to
/// exactly the next version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version every record is created at (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if `other` is exactly one past this version.
    pub fn is_followed_by(&self, other: Version) -> bool {
        other.0 == self.0 + 1
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A persisted entity with its concurrency metadata.
///
/// The domain-specific body lives in `state` as JSON; the columns the store
/// itself needs to filter on (owner, lock, status) are kept alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Identifier of the entity.
    pub id: EntityId,

    /// Kind of entity (e.g. "Ticket", "Order").
    pub entity_type: String,

    /// Current version.
    pub version: Version,

    /// Actor that created the entity. Never changes.
    pub owner: ActorId,

    /// Entity currently holding an exclusive claim on this one, if any.
    pub lock: Option<EntityId>,

    /// Domain status name.
    pub status: String,

    /// Entity body.
    pub state: serde_json::Value,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Creates a new record builder.
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// Deserializes the body into a concrete type.
    pub fn state_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }

    /// Returns true if another entity holds a claim on this record.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Produces the record as it looks after `update` is accepted.
    pub(crate) fn advanced(&self, update: RecordUpdate, at: DateTime<Utc>) -> StoredRecord {
        StoredRecord {
            id: self.id,
            entity_type: self.entity_type.clone(),
            version: self.version.next(),
            owner: self.owner,
            lock: update.lock,
            status: update.status,
            state: update.state,
            created_at: self.created_at,
            updated_at: at,
        }
    }
}

/// New mutable contents for a compare-and-swap write.
///
/// Identity, owner, and creation time are not part of an update and cannot be
/// changed by one.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub lock: Option<EntityId>,
    pub status: String,
    pub state: serde_json::Value,
}

impl RecordUpdate {
    pub fn new(lock: Option<EntityId>, status: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            lock,
            status: status.into(),
            state,
        }
    }
}

/// Builder for records about to be created.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    id: Option<EntityId>,
    entity_type: Option<String>,
    owner: Option<ActorId>,
    lock: Option<EntityId>,
    status: Option<String>,
    state: Option<serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
}

impl RecordBuilder {
    /// Sets the id. If not set, a new id is generated.
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn owner(mut self, owner: ActorId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn lock(mut self, lock: Option<EntityId>) -> Self {
        self.lock = lock;
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the body from a serializable value.
    pub fn state<T: Serialize>(mut self, state: &T) -> Result<Self, serde_json::Error> {
        self.state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Sets the body from a raw JSON value.
    pub fn state_raw(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the creation time. Defaults to now.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builds a version-0 record.
    pub fn build(self) -> Result<StoredRecord, StoreError> {
        let missing = |field: &str| StoreError::InvalidRecord(format!("{field} is required"));

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(StoredRecord {
            id: self.id.unwrap_or_default(),
            entity_type: self.entity_type.ok_or_else(|| missing("entity_type"))?,
            version: Version::initial(),
            owner: self.owner.ok_or_else(|| missing("owner"))?,
            lock: self.lock,
            status: self.status.ok_or_else(|| missing("status"))?,
            state: self.state.ok_or_else(|| missing("state"))?,
            created_at,
            updated_at: created_at,
        })
    }
}

/// Checks a record is fit to be created.
pub(crate) fn validate_for_create(record: &StoredRecord) -> Result<(), StoreError> {
    if record.version != Version::initial() {
        return Err(StoreError::InvalidRecord(format!(
            "new records start at version 0, got {}",
            record.version
        )));
    }
    if record.entity_type.is_empty() {
        return Err(StoreError::InvalidRecord(
            "entity_type must not be empty".to_string(),
        ));
    }
    if record.status.is_empty() {
        return Err(StoreError::InvalidRecord(
            "status must not be empty".to_string(),
        ));
    }
    Ok(())
}
