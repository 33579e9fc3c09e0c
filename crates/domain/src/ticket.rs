//! Ticket entity, owned by the tickets service.

use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, FieldError, Result};
use crate::value_objects::Money;

/// Availability of a ticket, derived from its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    Available,
    Reserved,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "Available",
            TicketStatus::Reserved => "Reserved",
        }
    }
}

/// A ticket listed for sale.
///
/// While an order holds the ticket, `order_id` names it and the ticket cannot
/// be edited or claimed by another order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    title: String,
    price: Money,
    #[serde(default)]
    order_id: Option<EntityId>,
}

impl Ticket {
    /// Creates an unreserved ticket after validating its fields.
    pub fn new(title: impl Into<String>, price: Money) -> Result<Self> {
        let title = title.into();
        validate(&title, price)?;
        Ok(Self {
            title,
            price,
            order_id: None,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn order_id(&self) -> Option<EntityId> {
        self.order_id
    }

    pub fn ticket_status(&self) -> TicketStatus {
        if self.order_id.is_some() {
            TicketStatus::Reserved
        } else {
            TicketStatus::Available
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.order_id.is_some()
    }

    /// Replaces title and price.
    pub fn edit(&mut self, title: impl Into<String>, price: Money) -> Result<()> {
        let title = title.into();
        validate(&title, price)?;
        self.title = title;
        self.price = price;
        Ok(())
    }

    /// Claims the ticket for an order.
    ///
    /// Claiming again for the holding order is a no-op; a different order
    /// must wait for the claim to be released.
    pub fn reserve(&mut self, order_id: EntityId) -> Result<()> {
        match self.order_id {
            Some(holder) if holder != order_id => Err(DomainError::InvalidState(format!(
                "Ticket is already reserved by order {holder}"
            ))),
            _ => {
                self.order_id = Some(order_id);
                Ok(())
            }
        }
    }

    /// Drops the claim of `order_id`. Returns false if that order does not
    /// hold the ticket.
    pub fn release(&mut self, order_id: EntityId) -> bool {
        if self.order_id == Some(order_id) {
            self.order_id = None;
            true
        } else {
            false
        }
    }
}

impl Entity for Ticket {
    fn entity_type() -> &'static str {
        "Ticket"
    }

    fn status(&self) -> &'static str {
        self.ticket_status().as_str()
    }

    fn lock(&self) -> Option<EntityId> {
        self.order_id
    }
}

/// Checks ticket fields, collecting one message per bad field.
pub fn validate(title: &str, price: Money) -> Result<()> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push(FieldError::for_field("title", "Title is required"));
    }
    if !price.is_positive() {
        errors.push(FieldError::for_field("price", "Price must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}
