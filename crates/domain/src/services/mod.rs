//! The three ticketing services.
//!
//! Each service owns one kind of entity and keeps replicas of what it needs
//! from the others. Request operations write through a [`Repository`] first
//! and publish the change second; the `apply_*` operations are the targets of
//! the event consumers and only ever touch local records.
//!
//! [`Repository`]: crate::Repository

pub mod orders;
pub mod payments;
pub mod tickets;

pub use orders::OrdersService;
pub use payments::PaymentsService;
pub use tickets::TicketsService;

use bus::PublishOutcome;

use crate::entity::Versioned;

/// How often a consumer-driven write is retried on a concurrency conflict
/// with a request handler before the event is left for redelivery.
pub const CONSUMER_WRITE_ATTEMPTS: usize = 5;

/// A committed write and what happened when its event was published.
///
/// The write stands regardless of `publish`.
#[derive(Debug, Clone)]
pub struct Committed<E> {
    pub record: Versioned<E>,
    pub publish: PublishOutcome,
}

impl<E> std::ops::Deref for Committed<E> {
    type Target = Versioned<E>;

    fn deref(&self) -> &Versioned<E> {
        &self.record
    }
}
