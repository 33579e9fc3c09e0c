//! Replica handlers for each service's subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{EventBus, EventMessage, Subject};
use common::EntityId;
use domain::{
    OrderEventData, OrdersService, PaymentEventData, PaymentGateway, PaymentsService,
    TicketEventData, TicketsService,
};
use record_store::{RecordStore, Version};

use crate::handler::ReplicaHandler;
use crate::{ReplicationError, Result};

const ORDER_SUBJECTS: &[Subject] = &[
    Subject::OrderCreated,
    Subject::OrderCancelled,
    Subject::OrderCompleted,
];

fn unexpected(message: &EventMessage) -> ReplicationError {
    ReplicationError::UnexpectedSubject {
        subject: message.subject,
        id: message.id,
    }
}

/// Tickets service: order events reserve and release tickets.
pub struct TicketOrderHandler<S: RecordStore, B: EventBus> {
    service: Arc<TicketsService<S, B>>,
}

impl<S: RecordStore, B: EventBus> TicketOrderHandler<S, B> {
    pub fn new(service: Arc<TicketsService<S, B>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, B> ReplicaHandler for TicketOrderHandler<S, B>
where
    S: RecordStore + Clone + 'static,
    B: EventBus + 'static,
{
    fn name(&self) -> &'static str {
        "tickets.orders"
    }

    fn subjects(&self) -> &'static [Subject] {
        ORDER_SUBJECTS
    }

    fn can_forget_applied(&self) -> bool {
        true
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        Ok(self.service.order_replica_version(id).await?)
    }

    async fn apply(&self, message: &EventMessage) -> Result<()> {
        let data: OrderEventData = message.decode()?;
        match message.subject {
            Subject::OrderCreated => self.service.apply_order_created(data, message.version).await?,
            Subject::OrderCancelled => {
                self.service.apply_order_cancelled(data, message.version).await?
            }
            Subject::OrderCompleted => {
                self.service.apply_order_completed(data, message.version).await?
            }
            _ => return Err(unexpected(message)),
        }
        Ok(())
    }
}

/// Orders service: ticket events keep the ticket replica current.
pub struct OrderTicketHandler<S: RecordStore, B: EventBus> {
    service: Arc<OrdersService<S, B>>,
}

impl<S: RecordStore, B: EventBus> OrderTicketHandler<S, B> {
    pub fn new(service: Arc<OrdersService<S, B>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, B> ReplicaHandler for OrderTicketHandler<S, B>
where
    S: RecordStore + Clone + 'static,
    B: EventBus + 'static,
{
    fn name(&self) -> &'static str {
        "orders.tickets"
    }

    fn subjects(&self) -> &'static [Subject] {
        &[Subject::TicketCreated, Subject::TicketUpdated]
    }

    fn can_forget_applied(&self) -> bool {
        true
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        Ok(self.service.ticket_replica_version(id).await?)
    }

    async fn apply(&self, message: &EventMessage) -> Result<()> {
        if !self.subjects().contains(&message.subject) {
            return Err(unexpected(message));
        }
        let data: TicketEventData = message.decode()?;
        self.service.apply_ticket(data, message.version).await?;
        Ok(())
    }
}

/// Orders service: payments complete their orders.
///
/// Payments are not replicated, so every process starts tracking them from
/// scratch; completing an already complete order is a no-op.
pub struct OrderPaymentHandler<S: RecordStore, B: EventBus> {
    service: Arc<OrdersService<S, B>>,
}

impl<S: RecordStore, B: EventBus> OrderPaymentHandler<S, B> {
    pub fn new(service: Arc<OrdersService<S, B>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, B> ReplicaHandler for OrderPaymentHandler<S, B>
where
    S: RecordStore + Clone + 'static,
    B: EventBus + 'static,
{
    fn name(&self) -> &'static str {
        "orders.payments"
    }

    fn subjects(&self) -> &'static [Subject] {
        &[Subject::PaymentCreated]
    }

    fn can_forget_applied(&self) -> bool {
        true
    }

    async fn apply(&self, message: &EventMessage) -> Result<()> {
        if message.subject != Subject::PaymentCreated {
            return Err(unexpected(message));
        }
        let data: PaymentEventData = message.decode()?;
        self.service.apply_payment_created(data).await?;
        Ok(())
    }
}

/// Payments service: order events keep the order replica current.
pub struct PaymentOrderHandler<S: RecordStore, B: EventBus, G: PaymentGateway> {
    service: Arc<PaymentsService<S, B, G>>,
}

impl<S: RecordStore, B: EventBus, G: PaymentGateway> PaymentOrderHandler<S, B, G> {
    pub fn new(service: Arc<PaymentsService<S, B, G>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, B, G> ReplicaHandler for PaymentOrderHandler<S, B, G>
where
    S: RecordStore + Clone + 'static,
    B: EventBus + 'static,
    G: PaymentGateway + 'static,
{
    fn name(&self) -> &'static str {
        "payments.orders"
    }

    fn subjects(&self) -> &'static [Subject] {
        ORDER_SUBJECTS
    }

    fn can_forget_applied(&self) -> bool {
        true
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        Ok(self.service.order_replica_version(id).await?)
    }

    async fn apply(&self, message: &EventMessage) -> Result<()> {
        if !ORDER_SUBJECTS.contains(&message.subject) {
            return Err(unexpected(message));
        }
        let data: OrderEventData = message.decode()?;
        self.service.apply_order(data, message.version).await?;
        Ok(())
    }
}
