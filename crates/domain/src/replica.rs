//! Local copies of entities owned by other services.
//!
//! Replicas are only ever written from events, at the version the event
//! carries, so their version always matches the owner's.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::events::{OrderEventData, TicketEventData};
use crate::order::OrderStatus;
use crate::ticket::TicketStatus;
use crate::value_objects::Money;

/// The orders service's view of a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketReplica {
    pub title: String,
    pub price: Money,
    #[serde(default)]
    pub order_id: Option<EntityId>,
}

impl From<&TicketEventData> for TicketReplica {
    fn from(data: &TicketEventData) -> Self {
        Self {
            title: data.title.clone(),
            price: data.price,
            order_id: data.order_id,
        }
    }
}

impl Entity for TicketReplica {
    fn entity_type() -> &'static str {
        "TicketReplica"
    }

    fn status(&self) -> &'static str {
        if self.order_id.is_some() {
            TicketStatus::Reserved.as_str()
        } else {
            TicketStatus::Available.as_str()
        }
    }

    fn lock(&self) -> Option<EntityId> {
        self.order_id
    }
}

/// The tickets and payments services' view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReplica {
    pub status: OrderStatus,
    pub ticket_id: EntityId,
    pub price: Money,
    pub expires_at: DateTime<Utc>,
}

impl From<&OrderEventData> for OrderReplica {
    fn from(data: &OrderEventData) -> Self {
        Self {
            status: data.status,
            ticket_id: data.ticket.id,
            price: data.ticket.price,
            expires_at: data.expires_at,
        }
    }
}

impl Entity for OrderReplica {
    fn entity_type() -> &'static str {
        "OrderReplica"
    }

    fn status(&self) -> &'static str {
        self.status.as_str()
    }
}
