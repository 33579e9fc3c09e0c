use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BusError, EventMessage, Subject};

/// A live subscription to one subject.
///
/// Yields messages until the bus closes. Delivery is at-least-once: the same
/// message may arrive more than once, and messages for different entities
/// may interleave in any order.
#[derive(Debug)]
pub struct Subscription {
    subject: Subject,
    receiver: mpsc::UnboundedReceiver<EventMessage>,
}

impl Subscription {
    pub fn new(subject: Subject, receiver: mpsc::UnboundedReceiver<EventMessage>) -> Self {
        Self { subject, receiver }
    }

    /// The subject this subscription receives.
    pub fn subject(&self) -> Subject {
        self.subject
    }

    /// Waits for the next message; None once the bus is closed.
    pub async fn next(&mut self) -> Option<EventMessage> {
        self.receiver.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_next(&mut self) -> Option<EventMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Bus client used by publishers and consumers.
///
/// Implementations must be at-least-once: a successful `publish` means the
/// bus has accepted the message for every current subscriber of the subject.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a message under its subject and waits for acknowledgement.
    async fn publish(&self, message: &EventMessage) -> Result<(), BusError>;

    /// Opens a subscription to a subject.
    async fn subscribe(&self, subject: Subject) -> Result<Subscription, BusError>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, message: &EventMessage) -> Result<(), BusError> {
        (**self).publish(message).await
    }

    async fn subscribe(&self, subject: Subject) -> Result<Subscription, BusError> {
        (**self).subscribe(subject).await
    }
}
