//! Orders service: owns orders, replicates tickets.

use bus::{EventBus, EventPublisher, PublishOutcome, Subject};
use chrono::{Duration, Utc};
use common::{ActorId, EntityId};
use record_store::{RecordQuery, RecordStore, Version};

use crate::entity::Versioned;
use crate::error::{AuthorizationError, Result};
use crate::events::{OrderEventData, PaymentEventData, TicketEventData};
use crate::gate::{Mutation, StateGate};
use crate::order::{Order, OrderStatus, TicketRef};
use crate::replica::TicketReplica;
use crate::repository::Repository;

use super::{CONSUMER_WRITE_ATTEMPTS, Committed};

/// How long a new order holds its ticket unless configured otherwise.
pub const DEFAULT_EXPIRATION: Duration = Duration::minutes(15);

pub struct OrdersService<S: RecordStore, B: EventBus> {
    orders: Repository<S, Order>,
    tickets: Repository<S, TicketReplica>,
    gate: StateGate<S>,
    publisher: EventPublisher<B>,
    expiration: Duration,
}

impl<S, B> OrdersService<S, B>
where
    S: RecordStore + Clone,
    B: EventBus,
{
    pub fn new(store: S, publisher: EventPublisher<B>) -> Self {
        Self {
            orders: Repository::new(store.clone()),
            tickets: Repository::new(store.clone()),
            gate: StateGate::new(store),
            publisher,
            expiration: DEFAULT_EXPIRATION,
        }
    }

    /// Sets how long new orders hold their ticket.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn publisher(&self) -> &EventPublisher<B> {
        &self.publisher
    }

    /// Places an order for a ticket known from the ticket replica.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, actor: ActorId, ticket_id: EntityId) -> Result<Committed<Order>> {
        let ticket = self.tickets.load(ticket_id).await?;
        let order_id = EntityId::new();
        self.gate.check(ticket_id, Mutation::Claim { by: order_id }).await?;

        let order = Order::new(
            TicketRef {
                id: ticket_id,
                price: ticket.price,
            },
            Utc::now() + self.expiration,
        );
        let record = self.orders.create(order_id, actor, order).await?;

        let publish = self.publish(Subject::OrderCreated, &record).await;
        Ok(Committed { record, publish })
    }

    /// Loads one of the actor's orders.
    pub async fn get(&self, actor: ActorId, id: EntityId) -> Result<Versioned<Order>> {
        let order = self.orders.load(id).await?;
        if !order.is_owned_by(actor) {
            return Err(AuthorizationError::NotOwner.into());
        }
        Ok(order)
    }

    /// Lists the actor's orders, oldest first.
    pub async fn list(&self, actor: ActorId) -> Result<Vec<Versioned<Order>>> {
        self.orders.query(RecordQuery::new().owner(actor)).await
    }

    /// Cancels one of the actor's orders, releasing its ticket.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, actor: ActorId, id: EntityId) -> Result<Committed<Order>> {
        let current = self.get(actor, id).await?;
        let record = self
            .orders
            .write(id, current.version, |order| order.cancel())
            .await?;

        let publish = self.publish(Subject::OrderCancelled, &record).await;
        Ok(Committed { record, publish })
    }

    /// Cancels an order whose reservation window has run out.
    ///
    /// Complete and already cancelled orders are left alone and `None` is
    /// returned.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, id: EntityId) -> Result<Option<Committed<Order>>> {
        let current = self.orders.load(id).await?;
        if current.order_status().is_terminal() {
            tracing::debug!(order_id = %id, status = %current.order_status(), "Order not expired");
            return Ok(None);
        }

        let record = self
            .orders
            .write(id, current.version, |order| order.cancel())
            .await?;
        let publish = self.publish(Subject::OrderCancelled, &record).await;
        Ok(Some(Committed { record, publish }))
    }

    /// Version of the local ticket replica.
    pub async fn ticket_replica_version(&self, ticket_id: EntityId) -> Result<Option<Version>> {
        self.tickets.current_version(ticket_id).await
    }

    pub async fn ticket_replica(&self, ticket_id: EntityId) -> Result<Option<Versioned<TicketReplica>>> {
        self.tickets.find(ticket_id).await
    }

    /// Reacts to `ticket:created` and `ticket:updated`.
    pub async fn apply_ticket(&self, data: TicketEventData, version: Version) -> Result<()> {
        self.tickets
            .sync(data.id, data.owner, version, TicketReplica::from(&data))
            .await?;
        Ok(())
    }

    /// Reacts to a payment: completes its order.
    ///
    /// Replays for an already complete order change nothing.
    #[tracing::instrument(skip(self, data), fields(order_id = %data.order_id))]
    pub async fn apply_payment_created(&self, data: PaymentEventData) -> Result<()> {
        let order = self.orders.load(data.order_id).await?;
        if order.order_status() == OrderStatus::Complete {
            return Ok(());
        }

        let record = self
            .orders
            .update_retrying(data.order_id, CONSUMER_WRITE_ATTEMPTS, |order| order.complete())
            .await?;
        self.publish(Subject::OrderCompleted, &record).await;
        Ok(())
    }

    async fn publish(&self, subject: Subject, record: &Versioned<Order>) -> PublishOutcome {
        self.publisher
            .publish_after_commit(subject, record.id, record.version, &OrderEventData::from(record))
            .await
    }
}
