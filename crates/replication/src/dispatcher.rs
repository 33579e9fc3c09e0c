//! Per-entity ordered event dispatch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bus::{EventMessage, Subscription};
use common::EntityId;
use record_store::Version;
use tokio::sync::{Mutex, watch};

use crate::Result;
use crate::handler::ReplicaHandler;

/// Default number of out-of-order events held back per entity.
pub const DEFAULT_BUFFER_LIMIT: usize = 64;

/// What the dispatcher knows about one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    /// Nothing applied or held yet.
    Absent,
    /// Last applied version; nothing is waiting.
    Synced(Version),
    /// Events are waiting for a gap after `applied` to be filled.
    Buffered {
        applied: Option<Version>,
        pending: BTreeMap<Version, EventMessage>,
    },
}

impl EntityState {
    /// Last applied version.
    pub fn applied(&self) -> Option<Version> {
        match self {
            EntityState::Absent => None,
            EntityState::Synced(version) => Some(*version),
            EntityState::Buffered { applied, .. } => *applied,
        }
    }

    /// The only version that may be applied next.
    pub fn expected(&self) -> Version {
        self.applied()
            .map(|version| version.next())
            .unwrap_or_else(Version::initial)
    }

    /// Number of events waiting.
    pub fn pending_len(&self) -> usize {
        match self {
            EntityState::Buffered { pending, .. } => pending.len(),
            _ => 0,
        }
    }

    fn take_pending(&mut self) -> BTreeMap<Version, EventMessage> {
        match self {
            EntityState::Buffered { pending, .. } => std::mem::take(pending),
            _ => BTreeMap::new(),
        }
    }

    fn settle(applied: Option<Version>, pending: BTreeMap<Version, EventMessage>) -> Self {
        match (applied, pending.is_empty()) {
            (None, true) => EntityState::Absent,
            (Some(version), true) => EntityState::Synced(version),
            (applied, false) => EntityState::Buffered { applied, pending },
        }
    }
}

/// What happened to one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event and `drained` buffered successors were applied.
    Applied { drained: usize },
    /// The event arrived ahead of a gap and is held back.
    Buffered,
    /// Duplicate or stale; nothing changed.
    Discarded,
    /// Ahead of a gap, but the entity's buffer was full and this was the
    /// furthest event; a redelivery may bring it back.
    Dropped,
    /// The event can never be applied and was dropped.
    Rejected,
}

/// Delivers events to a [`ReplicaHandler`] in per-entity version order.
///
/// For each entity the next acceptable version is exactly one past the last
/// applied one (or 0 for an entity never seen). Earlier versions are
/// discarded as duplicates; later ones are buffered until the gap closes.
/// Entities are independent: a failure or a gap for one never holds up
/// another. An entity with nothing buffered is forgotten once its handler
/// can restore the applied version from storage.
pub struct Dispatcher<H: ReplicaHandler> {
    handler: H,
    entities: Mutex<HashMap<EntityId, Arc<Mutex<EntityState>>>>,
    buffer_limit: usize,
}

impl<H: ReplicaHandler> Dispatcher<H> {
    /// Creates a new dispatcher for the given handler.
    pub fn new(handler: H) -> Self {
        Self::with_buffer_limit(handler, DEFAULT_BUFFER_LIMIT)
    }

    pub fn with_buffer_limit(handler: H, buffer_limit: usize) -> Self {
        Self {
            handler,
            entities: Mutex::new(HashMap::new()),
            buffer_limit: buffer_limit.max(1),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns a snapshot of what is known about `id`.
    pub async fn state_of(&self, id: EntityId) -> EntityState {
        let slot = self.entities.lock().await.get(&id).cloned();
        match slot {
            Some(slot) => slot.lock().await.clone(),
            None => EntityState::Absent,
        }
    }

    /// Decodes a raw message and dispatches it.
    ///
    /// Undecodable input is logged and rejected.
    pub async fn on_bytes(&self, bytes: &[u8]) -> Result<DispatchOutcome> {
        match EventMessage::from_bytes(bytes) {
            Ok(message) => self.on_event(&message).await,
            Err(e) => {
                tracing::warn!(handler = self.handler.name(), error = %e, "Rejected undecodable event");
                self.count_rejected();
                Ok(DispatchOutcome::Rejected)
            }
        }
    }

    /// Dispatches one event.
    ///
    /// An `Err` means the handler failed; the event was not applied and a
    /// redelivery will be tried again.
    #[tracing::instrument(
        skip(self, message),
        fields(handler = self.handler.name(), subject = %message.subject, entity_id = %message.id, version = %message.version)
    )]
    pub async fn on_event(&self, message: &EventMessage) -> Result<DispatchOutcome> {
        if !self.handler.subjects().contains(&message.subject) {
            tracing::warn!("Rejected event for a subject this handler does not consume");
            self.count_rejected();
            return Ok(DispatchOutcome::Rejected);
        }

        let slot = self.slot(message.id).await;
        let mut state = slot.lock().await;
        let outcome = self.dispatch(message, &mut state).await;

        if self.can_forget(&state) {
            self.forget(message.id, &slot).await;
        }
        outcome
    }

    /// Number of entities with in-memory state.
    pub async fn tracked_entities(&self) -> usize {
        self.entities.lock().await.len()
    }

    async fn dispatch(
        &self,
        message: &EventMessage,
        state: &mut EntityState,
    ) -> Result<DispatchOutcome> {
        if *state == EntityState::Absent
            && let Some(version) = self.handler.current_version(message.id).await?
        {
            *state = EntityState::Synced(version);
        }

        let expected = state.expected();
        if message.version < expected {
            tracing::debug!(expected = %expected, "Discarded duplicate or stale event");
            metrics::counter!("events_discarded_total", "handler" => self.handler.name())
                .increment(1);
            return Ok(DispatchOutcome::Discarded);
        }
        if message.version > expected {
            return Ok(if self.buffer(state, message.clone()) {
                DispatchOutcome::Buffered
            } else {
                DispatchOutcome::Dropped
            });
        }

        match self.apply(message).await {
            Ok(()) => {}
            Err(e) if e.is_malformed() => return Ok(DispatchOutcome::Rejected),
            Err(e) => return Err(e),
        }

        let mut applied = message.version;
        // Anything at or below the applied version is a stale redelivery.
        let mut pending = state.take_pending().split_off(&applied.next());
        let mut drained = 0;
        while let Some(entry) = pending.first_entry() {
            if !applied.is_followed_by(*entry.key()) {
                break;
            }
            let next = entry.get().clone();
            match self.apply(&next).await {
                Ok(()) => {
                    entry.remove();
                    applied = next.version;
                    drained += 1;
                }
                Err(e) if e.is_malformed() => {
                    entry.remove();
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        version = %next.version,
                        error = %e,
                        "Buffered event failed to apply; kept for retry"
                    );
                    break;
                }
            }
        }

        *state = EntityState::settle(Some(applied), pending);
        Ok(DispatchOutcome::Applied { drained })
    }

    /// Consumes a subscription until the bus closes or `shutdown` turns true.
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        let subject = subscription.subject();
        tracing::info!(handler = self.handler.name(), subject = %subject, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                message = subscription.next() => {
                    let Some(message) = message else {
                        break;
                    };
                    if let Err(e) = self.on_event(&message).await {
                        tracing::warn!(
                            handler = self.handler.name(),
                            subject = %subject,
                            entity_id = %message.id,
                            version = %message.version,
                            error = %e,
                            "Failed to apply event; awaiting redelivery"
                        );
                    }
                }
            }
        }

        tracing::info!(handler = self.handler.name(), subject = %subject, "Consumer stopped");
    }

    fn can_forget(&self, state: &EntityState) -> bool {
        match state {
            EntityState::Absent => true,
            EntityState::Synced(_) => self.handler.can_forget_applied(),
            EntityState::Buffered { .. } => false,
        }
    }

    /// Drops the entity's slot unless another event for it is in flight.
    async fn forget(&self, id: EntityId, slot: &Arc<Mutex<EntityState>>) {
        let mut entities = self.entities.lock().await;
        // One reference in the map, one held by the caller.
        if Arc::strong_count(slot) == 2 {
            entities.remove(&id);
        }
    }

    async fn slot(&self, id: EntityId) -> Arc<Mutex<EntityState>> {
        let mut entities = self.entities.lock().await;
        Arc::clone(
            entities
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(EntityState::Absent))),
        )
    }

    async fn apply(&self, message: &EventMessage) -> Result<()> {
        match self.handler.apply(message).await {
            Ok(()) => {
                metrics::counter!("events_applied_total", "handler" => self.handler.name())
                    .increment(1);
                Ok(())
            }
            Err(e) if e.is_malformed() => {
                tracing::warn!(
                    entity_id = %message.id,
                    version = %message.version,
                    error = %e,
                    "Rejected malformed event"
                );
                self.count_rejected();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Holds an early event back. Returns false if the buffer was full and
    /// the event itself was the one dropped.
    fn buffer(&self, state: &mut EntityState, message: EventMessage) -> bool {
        let applied = state.applied();
        let arrived = message.version;
        let mut pending = state.take_pending();
        pending.insert(arrived, message);

        let mut kept = true;
        if pending.len() > self.buffer_limit
            && let Some((dropped, _)) = pending.pop_last()
        {
            tracing::warn!(
                dropped = %dropped,
                limit = self.buffer_limit,
                "Replica buffer full; dropped furthest event"
            );
            metrics::counter!("events_dropped_total", "handler" => self.handler.name())
                .increment(1);
            kept = dropped != arrived;
        }

        if kept {
            tracing::debug!(expected = %state.expected(), "Out-of-order event buffered");
            metrics::counter!("events_buffered_total", "handler" => self.handler.name())
                .increment(1);
        }
        *state = EntityState::settle(applied, pending);
        kept
    }

    fn count_rejected(&self) {
        metrics::counter!("events_rejected_total", "handler" => self.handler.name()).increment(1);
    }
}
