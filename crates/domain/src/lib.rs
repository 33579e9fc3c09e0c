//! Ticketing domain.
//!
//! This crate provides:
//! - the [`Entity`] trait and a versioned [`Repository`] over a record store
//! - tickets, orders, payments and the replicas services keep of each other
//! - the [`StateGate`] that blocks mutations of entities claimed elsewhere
//! - the tickets, orders and payments services

pub mod entity;
pub mod error;
pub mod events;
pub mod gate;
pub mod order;
pub mod payment;
pub mod replica;
pub mod repository;
pub mod services;
pub mod ticket;
pub mod value_objects;

pub use entity::{Entity, Versioned};
pub use error::{AuthorizationError, DomainError, ErrorResponse, FieldError, Result};
pub use events::{OrderEventData, PaymentEventData, TicketEventData};
pub use gate::{GateDecision, Mutation, StateGate};
pub use order::{Order, OrderStatus, TicketRef};
pub use payment::{Charge, ChargeRequest, InMemoryPaymentGateway, Payment, PaymentGateway};
pub use replica::{OrderReplica, TicketReplica};
pub use repository::Repository;
pub use services::{Committed, OrdersService, PaymentsService, TicketsService};
pub use ticket::{Ticket, TicketStatus};
pub use value_objects::Money;
