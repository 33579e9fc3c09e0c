//! Replica maintenance for the ticketing services.
//!
//! Each service keeps local copies of entities owned by other services. A
//! [`Dispatcher`] feeds bus events to a [`ReplicaHandler`] one version at a
//! time per entity, buffering events that arrive early and discarding
//! redeliveries.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;

pub use dispatcher::{DEFAULT_BUFFER_LIMIT, DispatchOutcome, Dispatcher, EntityState};
pub use error::{ReplicationError, Result};
pub use handler::ReplicaHandler;
pub use handlers::{OrderPaymentHandler, OrderTicketHandler, PaymentOrderHandler, TicketOrderHandler};
