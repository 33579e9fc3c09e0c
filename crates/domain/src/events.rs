//! Payloads of the events exchanged between services.
//!
//! The entity version travels in the message envelope, not in these bodies.

use chrono::{DateTime, Utc};
use common::{ActorId, EntityId};
use serde::{Deserialize, Serialize};

use crate::entity::Versioned;
use crate::order::{Order, OrderStatus, TicketRef};
use crate::payment::Payment;
use crate::ticket::Ticket;
use crate::value_objects::Money;

/// Body of `ticket:created` and `ticket:updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEventData {
    pub id: EntityId,
    pub title: String,
    pub price: Money,
    pub owner: ActorId,
    #[serde(default)]
    pub order_id: Option<EntityId>,
}

impl From<&Versioned<Ticket>> for TicketEventData {
    fn from(ticket: &Versioned<Ticket>) -> Self {
        Self {
            id: ticket.id,
            title: ticket.title().to_string(),
            price: ticket.price(),
            owner: ticket.owner,
            order_id: ticket.order_id(),
        }
    }
}

/// Body of `order:created`, `order:cancelled` and `order:completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventData {
    pub id: EntityId,
    pub status: OrderStatus,
    pub owner: ActorId,
    pub expires_at: DateTime<Utc>,
    pub ticket: TicketRef,
}

impl From<&Versioned<Order>> for OrderEventData {
    fn from(order: &Versioned<Order>) -> Self {
        Self {
            id: order.id,
            status: order.order_status(),
            owner: order.owner,
            expires_at: order.expires_at(),
            ticket: order.ticket(),
        }
    }
}

/// Body of `payment:created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub id: EntityId,
    pub order_id: EntityId,
    pub charge_id: String,
}

impl From<&Versioned<Payment>> for PaymentEventData {
    fn from(payment: &Versioned<Payment>) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            charge_id: payment.charge_id.clone(),
        }
    }
}
