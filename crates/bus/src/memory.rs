use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{BusError, EventBus, EventMessage, Subject, Subscription};

#[derive(Debug, Default)]
struct BusState {
    subscribers: HashMap<Subject, Vec<mpsc::UnboundedSender<EventMessage>>>,
    published: Vec<EventMessage>,
    unlogged: bool,
    fail_on_publish: bool,
    publish_delay: Option<Duration>,
    closed: bool,
}

/// In-process event bus.
///
/// Fans every published message out to all subscriptions of its subject.
/// Records what was published and supports fault injection (rejecting or
/// stalling publishes) so publisher and consumer behavior can be tested
/// without a broker. A long-lived process should use
/// [`without_log`](Self::without_log), which keeps nothing after delivery.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Creates a new, open bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that does not keep the published log.
    pub fn without_log() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                unlogged: true,
                ..BusState::default()
            })),
        }
    }

    /// Makes subsequent publishes fail (or succeed again).
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Makes subsequent publishes wait `delay` before acknowledging.
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.publish_delay = delay;
    }

    /// Returns every acknowledged message, oldest first.
    pub async fn published(&self) -> Vec<EventMessage> {
        self.state.lock().await.published.clone()
    }

    /// Returns acknowledged messages for one subject, oldest first.
    pub async fn published_for(&self, subject: Subject) -> Vec<EventMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Returns the number of acknowledged messages.
    pub async fn publish_count(&self) -> usize {
        self.state.lock().await.published.len()
    }

    /// Pushes a message straight to current subscribers.
    ///
    /// Bypasses fault injection and the published log; used to simulate
    /// redelivery and reordering by the broker.
    pub async fn deliver(&self, message: EventMessage) {
        let mut state = self.state.lock().await;
        Self::fan_out(&mut state, message);
    }

    /// Closes the bus. Open subscriptions drain and then end.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.subscribers.clear();
    }

    fn fan_out(state: &mut BusState, message: EventMessage) {
        if let Some(senders) = state.subscribers.get_mut(&message.subject) {
            senders.retain(|sender| sender.send(message.clone()).is_ok());
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, message: &EventMessage) -> Result<(), BusError> {
        let delay = {
            let state = self.state.lock().await;
            if state.closed {
                return Err(BusError::Closed);
            }
            if state.fail_on_publish {
                return Err(BusError::PublishFailed {
                    subject: message.subject,
                    reason: "broker rejected message".to_string(),
                });
            }
            state.publish_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BusError::Closed);
        }
        if !state.unlogged {
            state.published.push(message.clone());
        }
        Self::fan_out(&mut state, message.clone());
        Ok(())
    }

    async fn subscribe(&self, subject: Subject) -> Result<Subscription, BusError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BusError::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.entry(subject).or_default().push(sender);
        Ok(Subscription::new(subject, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EntityId;
    use record_store::Version;

    fn message(subject: Subject, version: i64) -> EventMessage {
        EventMessage::new(
            subject,
            EntityId::new(),
            Version::new(version),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber_of_subject() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe(Subject::OrderCreated).await.unwrap();
        let mut b = bus.subscribe(Subject::OrderCreated).await.unwrap();
        let mut other = bus.subscribe(Subject::TicketCreated).await.unwrap();

        let sent = message(Subject::OrderCreated, 0);
        bus.publish(&sent).await.unwrap();

        assert_eq!(a.next().await.unwrap(), sent);
        assert_eq!(b.next().await.unwrap(), sent);
        assert!(other.try_next().is_none());
        assert_eq!(bus.publish_count().await, 1);
    }

    #[tokio::test]
    async fn failing_bus_rejects_and_records_nothing() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(Subject::TicketUpdated).await.unwrap();
        bus.set_fail_on_publish(true).await;

        let result = bus.publish(&message(Subject::TicketUpdated, 1)).await;

        assert!(matches!(result, Err(BusError::PublishFailed { .. })));
        assert_eq!(bus.publish_count().await, 0);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn unlogged_bus_delivers_but_keeps_nothing() {
        let bus = InMemoryEventBus::without_log();
        let mut sub = bus.subscribe(Subject::TicketUpdated).await.unwrap();

        for version in 0..100 {
            bus.publish(&message(Subject::TicketUpdated, version)).await.unwrap();
        }

        assert_eq!(bus.publish_count().await, 0);
        assert!(bus.published().await.is_empty());
        assert_eq!(sub.next().await.unwrap().version, Version::new(0));
    }

    #[tokio::test]
    async fn deliver_bypasses_log() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(Subject::TicketCreated).await.unwrap();

        let m = message(Subject::TicketCreated, 0);
        bus.deliver(m.clone()).await;
        bus.deliver(m.clone()).await;

        assert_eq!(sub.next().await.unwrap(), m);
        assert_eq!(sub.next().await.unwrap(), m);
        assert_eq!(bus.publish_count().await, 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(Subject::PaymentCreated).await.unwrap();

        bus.close().await;

        assert!(sub.next().await.is_none());
        assert!(matches!(
            bus.subscribe(Subject::PaymentCreated).await,
            Err(BusError::Closed)
        ));
        assert!(matches!(
            bus.publish(&message(Subject::PaymentCreated, 0)).await,
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe(Subject::OrderCancelled).await.unwrap();
        drop(sub);

        bus.publish(&message(Subject::OrderCancelled, 1)).await.unwrap();
        assert!(
            bus.state.lock().await.subscribers[&Subject::OrderCancelled].is_empty()
        );
    }
}
