//! Versioned record store.
//!
//! Every stored entity carries a version counter that starts at 0 and grows
//! by exactly one per accepted write. Writes name the version they expect to
//! replace; a mismatch is a [`StoreError::ConcurrencyConflict`] and nothing is
//! persisted.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::{ActorId, EntityId};
pub use error::{Result, StoreError};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use query::RecordQuery;
pub use record::{RecordBuilder, RecordUpdate, StoredRecord, Version};
pub use store::{RecordStore, RecordStoreExt, SharedRecordStore};
