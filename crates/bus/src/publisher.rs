use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::EntityId;
use record_store::Version;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{EventBus, EventMessage, PublishError, Subject};

/// Default time to wait for a bus acknowledgement.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Acknowledgement of a publish by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub event_id: Uuid,
    pub subject: Subject,
    pub id: EntityId,
    pub version: Version,
}

/// A publish that failed after its write committed.
///
/// Kept so an out-of-band reconciler can republish it later.
#[derive(Debug, Clone)]
pub struct FailedPublish {
    pub subject: Subject,
    pub id: EntityId,
    pub version: Version,
    pub payload: serde_json::Value,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Result of publishing after a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Acknowledged(Ack),
    Failed { reason: String },
}

impl PublishOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, PublishOutcome::Acknowledged(_))
    }
}

/// Publishes change events with a bounded wait for acknowledgement.
///
/// A publish is attempted exactly once. When the bus does not acknowledge in
/// time the attempt is abandoned and reported as [`PublishError::Timeout`].
pub struct EventPublisher<B: EventBus> {
    bus: B,
    timeout: Duration,
    failed: Arc<Mutex<Vec<FailedPublish>>>,
}

impl<B: EventBus + Clone> Clone for EventPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            timeout: self.timeout,
            failed: Arc::clone(&self.failed),
        }
    }
}

impl<B: EventBus> EventPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self::with_timeout(bus, DEFAULT_PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(bus: B, timeout: Duration) -> Self {
        Self {
            bus,
            timeout,
            failed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publishes one event and waits at most the configured timeout.
    pub async fn publish<T: Serialize>(
        &self,
        subject: Subject,
        id: EntityId,
        version: Version,
        payload: &T,
    ) -> Result<Ack, PublishError> {
        let message = EventMessage::from_payload(subject, id, version, payload)?;
        self.send(&message).await
    }

    /// Publishes an event for a write that has already committed.
    ///
    /// Failures are logged, counted and recorded for reconciliation; they
    /// are never returned as errors.
    pub async fn publish_after_commit<T: Serialize>(
        &self,
        subject: Subject,
        id: EntityId,
        version: Version,
        payload: &T,
    ) -> PublishOutcome {
        let (result, payload) = match EventMessage::from_payload(subject, id, version, payload) {
            Ok(message) => (self.send(&message).await, message.payload),
            Err(e) => (Err(PublishError::from(e)), serde_json::Value::Null),
        };

        match result {
            Ok(ack) => PublishOutcome::Acknowledged(ack),
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    subject = %subject,
                    entity_id = %id,
                    version = %version,
                    error = %reason,
                    "Event publish failed after commit; recorded for reconciliation"
                );
                self.failed.lock().await.push(FailedPublish {
                    subject,
                    id,
                    version,
                    payload,
                    reason: reason.clone(),
                    failed_at: Utc::now(),
                });
                PublishOutcome::Failed { reason }
            }
        }
    }

    /// Returns publishes that failed and have not been drained.
    pub async fn pending_reconciliation(&self) -> Vec<FailedPublish> {
        self.failed.lock().await.clone()
    }

    /// Removes and returns every recorded failed publish.
    pub async fn drain_reconciliation(&self) -> Vec<FailedPublish> {
        std::mem::take(&mut *self.failed.lock().await)
    }

    async fn send(&self, message: &EventMessage) -> Result<Ack, PublishError> {
        let subject = message.subject;
        let result = tokio::time::timeout(self.timeout, self.bus.publish(message)).await;

        match result {
            Ok(Ok(())) => {
                metrics::counter!("events_published_total", "subject" => subject.as_str())
                    .increment(1);
                tracing::debug!(
                    subject = %subject,
                    entity_id = %message.id,
                    version = %message.version,
                    "Event published"
                );
                Ok(Ack {
                    event_id: message.event_id,
                    subject,
                    id: message.id,
                    version: message.version,
                })
            }
            Ok(Err(source)) => {
                metrics::counter!("publish_failures_total", "subject" => subject.as_str())
                    .increment(1);
                Err(PublishError::Rejected {
                    subject,
                    id: message.id,
                    version: message.version,
                    source,
                })
            }
            Err(_) => {
                metrics::counter!("publish_failures_total", "subject" => subject.as_str())
                    .increment(1);
                Err(PublishError::Timeout {
                    subject,
                    id: message.id,
                    version: message.version,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}
