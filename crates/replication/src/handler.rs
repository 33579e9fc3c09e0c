//! Core replica handler trait.

use async_trait::async_trait;
use bus::{EventMessage, Subject};
use common::EntityId;
use record_store::Version;

use crate::Result;

/// Applies one kind of remote change to local state.
///
/// Handlers are fed by a [`Dispatcher`](crate::Dispatcher), which guarantees
/// that for any one entity `apply` only sees versions in strict sequence
/// (0, 1, 2, ...) and never the same version twice within a process.
#[async_trait]
pub trait ReplicaHandler: Send + Sync {
    /// Returns the name of this handler, for logs and metrics.
    fn name(&self) -> &'static str;

    /// Subjects this handler consumes.
    fn subjects(&self) -> &'static [Subject];

    /// Version of the local replica of `id`, if one is stored.
    ///
    /// Lets a dispatcher that has not seen `id` yet resume after the last
    /// durably applied version instead of waiting for version 0.
    async fn current_version(&self, _id: EntityId) -> Result<Option<Version>> {
        Ok(None)
    }

    /// Whether the dispatcher may drop its record of an entity once nothing
    /// is buffered for it.
    ///
    /// True when [`current_version`](Self::current_version) restores the
    /// applied version, or when applying an event twice is harmless.
    fn can_forget_applied(&self) -> bool {
        false
    }

    /// Applies one event.
    async fn apply(&self, message: &EventMessage) -> Result<()>;
}
