//! Tickets service: owns tickets, replicates orders.

use bus::{EventBus, EventPublisher, Subject};
use common::{ActorId, EntityId};
use record_store::{RecordQuery, RecordStore, Version};

use crate::entity::Versioned;
use crate::error::{AuthorizationError, DomainError, Result};
use crate::events::{OrderEventData, TicketEventData};
use crate::gate::{GateDecision, Mutation, StateGate};
use crate::replica::OrderReplica;
use crate::repository::Repository;
use crate::ticket::{self, Ticket};
use crate::value_objects::Money;

use super::{CONSUMER_WRITE_ATTEMPTS, Committed};

pub struct TicketsService<S: RecordStore, B: EventBus> {
    tickets: Repository<S, Ticket>,
    orders: Repository<S, OrderReplica>,
    gate: StateGate<S>,
    publisher: EventPublisher<B>,
}

impl<S, B> TicketsService<S, B>
where
    S: RecordStore + Clone,
    B: EventBus,
{
    pub fn new(store: S, publisher: EventPublisher<B>) -> Self {
        Self {
            tickets: Repository::new(store.clone()),
            orders: Repository::new(store.clone()),
            gate: StateGate::new(store),
            publisher,
        }
    }

    pub fn publisher(&self) -> &EventPublisher<B> {
        &self.publisher
    }

    /// Lists a new ticket for sale.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, actor: ActorId, title: String, price: Money) -> Result<Committed<Ticket>> {
        let ticket = Ticket::new(title, price)?;
        let record = self.tickets.create(EntityId::new(), actor, ticket).await?;
        let publish = self.publish(Subject::TicketCreated, &record).await;
        Ok(Committed { record, publish })
    }

    /// Changes title and price of an unreserved ticket.
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        actor: ActorId,
        id: EntityId,
        title: String,
        price: Money,
    ) -> Result<Committed<Ticket>> {
        ticket::validate(&title, price)?;
        let current = self.tickets.load(id).await?;
        self.gate.check(id, Mutation::Edit).await?;
        if !current.is_owned_by(actor) {
            return Err(AuthorizationError::NotOwner.into());
        }

        // The gate only lets a held ticket through when its holder is gone.
        let stale_holder = current.order_id();
        let record = self
            .tickets
            .write(id, current.version, move |ticket| {
                if let Some(holder) = stale_holder {
                    ticket.release(holder);
                }
                ticket.edit(title, price)
            })
            .await?;

        let publish = self.publish(Subject::TicketUpdated, &record).await;
        Ok(Committed { record, publish })
    }

    pub async fn get(&self, id: EntityId) -> Result<Versioned<Ticket>> {
        self.tickets.load(id).await
    }

    /// Returns tickets no order currently holds, oldest first.
    pub async fn list_available(&self) -> Result<Vec<Versioned<Ticket>>> {
        self.tickets.query(RecordQuery::new().locked(false)).await
    }

    /// Version of the local order replica.
    pub async fn order_replica_version(&self, order_id: EntityId) -> Result<Option<Version>> {
        self.orders.current_version(order_id).await
    }

    pub async fn order_replica(&self, order_id: EntityId) -> Result<Option<Versioned<OrderReplica>>> {
        self.orders.find(order_id).await
    }

    /// Reacts to a new order: reserves its ticket and records the order.
    #[tracing::instrument(skip(self, data), fields(order_id = %data.id))]
    pub async fn apply_order_created(&self, data: OrderEventData, version: Version) -> Result<()> {
        let order_id = data.id;
        let ticket_id = data.ticket.id;
        let ticket = self.tickets.load(ticket_id).await?;

        if ticket.order_id() != Some(order_id) {
            match self.gate.authorize(ticket_id, Mutation::Claim { by: order_id }).await? {
                GateDecision::Allow => {
                    let stale_holder = ticket.order_id();
                    let record = self
                        .tickets
                        .update_retrying(ticket_id, CONSUMER_WRITE_ATTEMPTS, move |ticket| {
                            if let Some(holder) = stale_holder {
                                ticket.release(holder);
                            }
                            ticket.reserve(order_id)
                        })
                        .await?;
                    self.publish(Subject::TicketUpdated, &record).await;
                }
                GateDecision::Reject { holder, reason } => {
                    tracing::warn!(
                        ticket_id = %ticket_id,
                        holder = %holder,
                        reason = %reason,
                        "Order arrived for a ticket held by another order"
                    );
                }
            }
        }

        self.orders
            .sync(order_id, data.owner, version, OrderReplica::from(&data))
            .await?;
        Ok(())
    }

    /// Reacts to a cancelled order: frees its ticket and records the order.
    #[tracing::instrument(skip(self, data), fields(order_id = %data.id))]
    pub async fn apply_order_cancelled(&self, data: OrderEventData, version: Version) -> Result<()> {
        let order_id = data.id;
        let ticket_id = data.ticket.id;

        if self.tickets.load(ticket_id).await?.order_id().is_some() {
            match self.gate.authorize(ticket_id, Mutation::Release { by: order_id }).await? {
                GateDecision::Allow => self.release(ticket_id, order_id).await?,
                GateDecision::Reject { holder, reason } => {
                    tracing::debug!(
                        ticket_id = %ticket_id,
                        holder = %holder,
                        reason = %reason,
                        "Cancelled order does not hold the ticket"
                    );
                }
            }
        }

        self.orders
            .sync(order_id, data.owner, version, OrderReplica::from(&data))
            .await?;
        Ok(())
    }

    /// Records a completed order. The ticket stays reserved.
    pub async fn apply_order_completed(&self, data: OrderEventData, version: Version) -> Result<()> {
        self.orders
            .sync(data.id, data.owner, version, OrderReplica::from(&data))
            .await?;
        Ok(())
    }

    async fn release(&self, ticket_id: EntityId, order_id: EntityId) -> Result<()> {
        let released = self
            .tickets
            .update_retrying(ticket_id, CONSUMER_WRITE_ATTEMPTS, move |ticket| {
                if ticket.release(order_id) {
                    Ok(())
                } else {
                    Err(DomainError::InvalidState("Ticket no longer held".to_string()))
                }
            })
            .await;

        match released {
            Ok(record) => {
                self.publish(Subject::TicketUpdated, &record).await;
                Ok(())
            }
            // Released concurrently, or the holder's claim had already lapsed.
            Err(DomainError::InvalidState(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, subject: Subject, record: &Versioned<Ticket>) -> bus::PublishOutcome {
        self.publisher
            .publish_after_commit(subject, record.id, record.version, &TicketEventData::from(record))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, TicketRef};
    use bus::InMemoryEventBus;
    use chrono::Utc;
    use record_store::InMemoryRecordStore;

    fn service() -> (TicketsService<InMemoryRecordStore, InMemoryEventBus>, InMemoryEventBus) {
        let bus = InMemoryEventBus::new();
        let service = TicketsService::new(InMemoryRecordStore::new(), EventPublisher::new(bus.clone()));
        (service, bus)
    }

    fn order_data(ticket_id: EntityId, status: OrderStatus) -> OrderEventData {
        OrderEventData {
            id: EntityId::new(),
            status,
            owner: ActorId::new(),
            expires_at: Utc::now(),
            ticket: TicketRef {
                id: ticket_id,
                price: Money::from_minor(2000),
            },
        }
    }

    #[tokio::test]
    async fn test_create_publishes_version_zero() {
        let (service, bus) = service();
        let created = service
            .create(ActorId::new(), "concert".into(), Money::from_minor(2000))
            .await
            .unwrap();

        assert_eq!(created.version, Version::initial());
        assert!(created.publish.is_acknowledged());
        let sent = bus.published_for(Subject::TicketCreated).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, created.id);
        let body: TicketEventData = sent[0].decode().unwrap();
        assert_eq!(body.title, "concert");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let (service, bus) = service();
        let err = service
            .create(ActorId::new(), String::new(), Money::from_minor(2000))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert_eq!(bus.publish_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_checks_existence_and_owner() {
        let (service, _) = service();
        let owner = ActorId::new();
        let created = service.create(owner, "concert".into(), Money::from_minor(2000)).await.unwrap();

        let missing = service
            .update(owner, EntityId::new(), "x".into(), Money::from_minor(10))
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), 404);

        let stranger = service
            .update(ActorId::new(), created.id, "x".into(), Money::from_minor(10))
            .await
            .unwrap_err();
        assert_eq!(stranger.status_code(), 401);

        let updated = service
            .update(owner, created.id, "opera".into(), Money::from_minor(4500))
            .await
            .unwrap();
        assert_eq!(updated.version, Version::new(1));
        assert_eq!(updated.title(), "opera");
    }

    #[tokio::test]
    async fn test_order_created_locks_ticket_and_blocks_edits() {
        let (service, bus) = service();
        let owner = ActorId::new();
        let ticket = service.create(owner, "concert".into(), Money::from_minor(2000)).await.unwrap();
        let order = order_data(ticket.id, OrderStatus::Created);

        service.apply_order_created(order.clone(), Version::initial()).await.unwrap();

        let locked = service.get(ticket.id).await.unwrap();
        assert_eq!(locked.version, Version::new(1));
        assert_eq!(locked.order_id(), Some(order.id));
        assert_eq!(bus.published_for(Subject::TicketUpdated).await.len(), 1);
        assert_eq!(service.order_replica_version(order.id).await.unwrap(), Some(Version::initial()));

        let err = service
            .update(owner, ticket.id, "opera".into(), Money::from_minor(4500))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Authorization(AuthorizationError::Locked { .. })));
        assert_eq!(err.status_code(), 400);
        assert!(service.list_available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_cancelled_releases_ticket() {
        let (service, _) = service();
        let owner = ActorId::new();
        let ticket = service.create(owner, "concert".into(), Money::from_minor(2000)).await.unwrap();
        let mut order = order_data(ticket.id, OrderStatus::Created);
        service.apply_order_created(order.clone(), Version::initial()).await.unwrap();

        order.status = OrderStatus::Cancelled;
        service.apply_order_cancelled(order.clone(), Version::new(1)).await.unwrap();

        let released = service.get(ticket.id).await.unwrap();
        assert_eq!(released.order_id(), None);
        assert_eq!(released.version, Version::new(2));
        let replica = service.order_replica(order.id).await.unwrap().unwrap();
        assert_eq!(replica.status, OrderStatus::Cancelled);

        service
            .update(owner, ticket.id, "opera".into(), Money::from_minor(4500))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelling_another_order_keeps_the_reservation() {
        let (service, bus) = service();
        let ticket = service
            .create(ActorId::new(), "concert".into(), Money::from_minor(2000))
            .await
            .unwrap();
        let holder = order_data(ticket.id, OrderStatus::Created);
        let mut other = order_data(ticket.id, OrderStatus::Created);
        service.apply_order_created(holder.clone(), Version::initial()).await.unwrap();
        service.apply_order_created(other.clone(), Version::initial()).await.unwrap();

        other.status = OrderStatus::Cancelled;
        service.apply_order_cancelled(other.clone(), Version::new(1)).await.unwrap();

        let still_held = service.get(ticket.id).await.unwrap();
        assert_eq!(still_held.order_id(), Some(holder.id));
        assert_eq!(still_held.version, Version::new(1));
        assert_eq!(bus.published_for(Subject::TicketUpdated).await.len(), 1);
        let replica = service.order_replica(other.id).await.unwrap().unwrap();
        assert_eq!(replica.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_second_order_for_held_ticket_does_not_steal_it() {
        let (service, _) = service();
        let ticket = service
            .create(ActorId::new(), "concert".into(), Money::from_minor(2000))
            .await
            .unwrap();
        let first = order_data(ticket.id, OrderStatus::Created);
        let second = order_data(ticket.id, OrderStatus::Created);

        service.apply_order_created(first.clone(), Version::initial()).await.unwrap();
        service.apply_order_created(second.clone(), Version::initial()).await.unwrap();

        assert_eq!(service.get(ticket.id).await.unwrap().order_id(), Some(first.id));
        assert!(service.order_replica(second.id).await.unwrap().is_some());
    }
}
