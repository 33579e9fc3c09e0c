//! Cross-service state gate.
//!
//! Decides whether a local mutation may proceed given the claims (locks)
//! visible in this service's records. The answer is only as fresh as the
//! local replicas; there is no coordination with the owning service.

use common::EntityId;
use record_store::{RecordStore, StoredRecord};

use crate::error::{AuthorizationError, DomainError, Result};
use crate::order::OrderStatus;

/// What a caller intends to do to a possibly claimed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Change the entity's own fields.
    Edit,
    /// Take the claim for `by`.
    Claim { by: EntityId },
    /// Give up the claim held by `by`.
    Release { by: EntityId },
}

/// Outcome of [`StateGate::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject { holder: EntityId, reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Pure decision over the locally known lock of one entity.
///
/// `holder_released` is true when the holder is known to be cancelled,
/// which releases its claim implicitly.
pub fn evaluate(
    kind: &str,
    lock: Option<EntityId>,
    holder_released: bool,
    mutation: Mutation,
) -> GateDecision {
    let Some(holder) = lock else {
        return GateDecision::Allow;
    };
    if holder_released {
        return GateDecision::Allow;
    }

    match mutation {
        Mutation::Claim { by } | Mutation::Release { by } if by == holder => GateDecision::Allow,
        Mutation::Edit => GateDecision::Reject {
            holder,
            reason: format!("Cannot edit a reserved {kind}"),
        },
        Mutation::Claim { .. } => GateDecision::Reject {
            holder,
            reason: format!("The {kind} is already reserved"),
        },
        Mutation::Release { .. } => GateDecision::Reject {
            holder,
            reason: format!("Only the holder can release this {kind}"),
        },
    }
}

/// Reads claims from a service's own record store.
///
/// The claimed entity and its holder must both be visible in the store: the
/// tickets service keeps tickets and an order replica, the orders service
/// keeps orders and a ticket replica.
#[derive(Clone)]
pub struct StateGate<S: RecordStore> {
    store: S,
}

impl<S: RecordStore> StateGate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decides whether `mutation` may be applied to `id`.
    ///
    /// An entity unknown to this service carries no visible claim and is
    /// allowed; existence is the caller's concern.
    pub async fn authorize(&self, id: EntityId, mutation: Mutation) -> Result<GateDecision> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(GateDecision::Allow);
        };
        let Some(holder) = record.lock else {
            return Ok(GateDecision::Allow);
        };

        let released = self.holder_released(holder).await?;
        let decision = evaluate(&kind_of(&record), Some(holder), released, mutation);
        if !decision.is_allowed() {
            tracing::debug!(entity_id = %id, holder = %holder, ?mutation, "State gate rejected mutation");
        }
        Ok(decision)
    }

    /// Like [`authorize`](Self::authorize), but turns a rejection into
    /// [`AuthorizationError::Locked`].
    pub async fn check(&self, id: EntityId, mutation: Mutation) -> Result<()> {
        match self.authorize(id, mutation).await? {
            GateDecision::Allow => Ok(()),
            GateDecision::Reject { holder, reason } => Err(DomainError::Authorization(
                AuthorizationError::Locked { id, holder, reason },
            )),
        }
    }

    /// Returns true if the holder is known locally to be cancelled.
    pub async fn holder_released(&self, holder: EntityId) -> Result<bool> {
        Ok(self
            .store
            .get(holder)
            .await?
            .is_some_and(|record| record.status == OrderStatus::Cancelled.as_str()))
    }
}

fn kind_of(record: &StoredRecord) -> String {
    record
        .entity_type
        .trim_end_matches("Replica")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ActorId;
    use record_store::{InMemoryRecordStore, RecordStoreExt, RecordUpdate, Version};

    #[test]
    fn test_unlocked_allows_everything() {
        for mutation in [
            Mutation::Edit,
            Mutation::Claim { by: EntityId::new() },
            Mutation::Release { by: EntityId::new() },
        ] {
            assert!(evaluate("ticket", None, false, mutation).is_allowed());
        }
    }

    #[test]
    fn test_lock_rejects_non_holders() {
        let holder = EntityId::new();
        let other = EntityId::new();

        let edit = evaluate("ticket", Some(holder), false, Mutation::Edit);
        assert_eq!(
            edit,
            GateDecision::Reject {
                holder,
                reason: "Cannot edit a reserved ticket".into()
            }
        );
        assert!(!evaluate("ticket", Some(holder), false, Mutation::Claim { by: other }).is_allowed());
        assert!(!evaluate("ticket", Some(holder), false, Mutation::Release { by: other }).is_allowed());
    }

    #[test]
    fn test_holder_may_release_or_reclaim() {
        let holder = EntityId::new();
        assert!(evaluate("ticket", Some(holder), false, Mutation::Release { by: holder }).is_allowed());
        assert!(evaluate("ticket", Some(holder), false, Mutation::Claim { by: holder }).is_allowed());
    }

    #[test]
    fn test_cancelled_holder_releases_implicitly() {
        let holder = EntityId::new();
        assert!(evaluate("ticket", Some(holder), true, Mutation::Edit).is_allowed());
        assert!(evaluate("ticket", Some(holder), true, Mutation::Claim { by: EntityId::new() }).is_allowed());
    }

    async fn seed(store: &InMemoryRecordStore, entity_type: &str, lock: Option<EntityId>, status: &str) -> EntityId {
        let record = StoredRecord::builder()
            .entity_type(entity_type)
            .owner(ActorId::new())
            .lock(lock)
            .status(status)
            .state_raw(serde_json::json!({}))
            .build()
            .unwrap();
        store.create(record).await.unwrap().id
    }

    #[tokio::test]
    async fn test_gate_reads_lock_and_holder_from_store() {
        let store = InMemoryRecordStore::new();
        let order = seed(&store, "OrderReplica", None, "Created").await;
        let ticket = seed(&store, "Ticket", Some(order), "Reserved").await;
        let gate = StateGate::new(store.clone());

        let err = gate.check(ticket, Mutation::Edit).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "Cannot edit a reserved ticket");

        store
            .compare_and_swap(
                order,
                Version::initial(),
                RecordUpdate::new(None, "Cancelled", serde_json::json!({})),
            )
            .await
            .unwrap();

        gate.check(ticket, Mutation::Edit).await.unwrap();
        assert!(store.load(ticket).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_unknown_holder_keeps_lock() {
        let store = InMemoryRecordStore::new();
        let ticket = seed(&store, "TicketReplica", Some(EntityId::new()), "Reserved").await;
        let gate = StateGate::new(store);

        let decision = gate.authorize(ticket, Mutation::Claim { by: EntityId::new() }).await.unwrap();
        assert!(matches!(decision, GateDecision::Reject { ref reason, .. } if reason == "The ticket is already reserved"));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_allowed() {
        let gate = StateGate::new(InMemoryRecordStore::new());
        assert!(gate.authorize(EntityId::new(), Mutation::Edit).await.unwrap().is_allowed());
    }
}
