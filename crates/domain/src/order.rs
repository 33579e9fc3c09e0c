//! Order entity and its status machine, owned by the orders service.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, Result};
use crate::value_objects::Money;

/// The status of an order in its lifecycle.
///
/// ```text
/// Created ──► Complete
///    │
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order exists and holds its ticket.
    #[default]
    Created,

    /// Payment received (terminal).
    Complete,

    /// Cancelled or expired; the ticket is free again (terminal).
    Cancelled,
}

impl OrderStatus {
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Complete | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Complete => "Complete",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ticket an order is for, with the price at the time of ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: EntityId,
    pub price: Money,
}

/// A buyer's claim on one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    status: OrderStatus,
    ticket: TicketRef,
    expires_at: DateTime<Utc>,
}

impl Order {
    pub fn new(ticket: TicketRef, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: OrderStatus::Created,
            ticket,
            expires_at,
        }
    }

    pub fn order_status(&self) -> OrderStatus {
        self.status
    }

    pub fn ticket(&self) -> TicketRef {
        self.ticket
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn complete(&mut self) -> Result<()> {
        if !self.status.can_complete() {
            return Err(self.transition_error("complete"));
        }
        self.status = OrderStatus::Complete;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !self.status.can_cancel() {
            return Err(self.transition_error("cancel"));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    fn transition_error(&self, action: &str) -> DomainError {
        DomainError::InvalidState(format!("Cannot {action} an order in state {}", self.status))
    }
}

impl Entity for Order {
    fn entity_type() -> &'static str {
        "Order"
    }

    fn status(&self) -> &'static str {
        self.status.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order() -> Order {
        Order::new(
            TicketRef {
                id: EntityId::new(),
                price: Money::from_minor(2000),
            },
            Utc::now() + Duration::minutes(15),
        )
    }

    #[test]
    fn test_default_status_is_created() {
        assert_eq!(OrderStatus::default(), OrderStatus::Created);
        assert_eq!(order().order_status(), OrderStatus::Created);
    }

    #[test]
    fn test_status_transitions() {
        assert!(OrderStatus::Created.can_complete());
        assert!(!OrderStatus::Cancelled.can_complete());
        assert!(!OrderStatus::Complete.can_cancel());
        assert!(OrderStatus::Complete.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Created.is_terminal());
    }

    #[test]
    fn test_payment_path() {
        let mut order = order();
        order.complete().unwrap();
        assert!(order.complete().is_err());
        assert_eq!(order.order_status(), OrderStatus::Complete);
        assert!(matches!(order.cancel(), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn test_cancelled_order_cannot_complete() {
        let mut order = order();
        order.cancel().unwrap();
        assert_eq!(Entity::status(&order), "Cancelled");
        assert!(order.complete().is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Cancelled).unwrap(),
            "\"Cancelled\""
        );
    }
}
