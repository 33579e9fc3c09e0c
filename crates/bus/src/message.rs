use chrono::{DateTime, Utc};
use common::EntityId;
use record_store::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject (event type) a message is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "ticket:created")]
    TicketCreated,
    #[serde(rename = "ticket:updated")]
    TicketUpdated,
    #[serde(rename = "order:created")]
    OrderCreated,
    #[serde(rename = "order:cancelled")]
    OrderCancelled,
    #[serde(rename = "order:completed")]
    OrderCompleted,
    #[serde(rename = "payment:created")]
    PaymentCreated,
}

impl Subject {
    /// Every subject, in declaration order.
    pub const ALL: [Subject; 6] = [
        Subject::TicketCreated,
        Subject::TicketUpdated,
        Subject::OrderCreated,
        Subject::OrderCancelled,
        Subject::OrderCompleted,
        Subject::PaymentCreated,
    ];

    /// Returns the wire name of the subject.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::TicketCreated => "ticket:created",
            Subject::TicketUpdated => "ticket:updated",
            Subject::OrderCreated => "order:created",
            Subject::OrderCancelled => "order:cancelled",
            Subject::OrderCompleted => "order:completed",
            Subject::PaymentCreated => "payment:created",
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event as it travels over the bus.
///
/// `version` is the version of the entity *after* the change described by
/// the event. Consumers rely on it to apply events for one entity in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique per publish; redeliveries of the same publish share it.
    pub event_id: Uuid,

    /// The entity the event is about.
    pub id: EntityId,

    /// Entity version produced by the change.
    pub version: Version,

    /// Event type.
    #[serde(rename = "type")]
    pub subject: Subject,

    /// Event body.
    pub payload: serde_json::Value,

    /// When the publisher handed the event to the bus.
    pub published_at: DateTime<Utc>,
}

impl EventMessage {
    /// Creates a message with a fresh event id.
    pub fn new(
        subject: Subject,
        id: EntityId,
        version: Version,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            id,
            version,
            subject,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Creates a message from a serializable payload.
    pub fn from_payload<T: Serialize>(
        subject: Subject,
        id: EntityId,
        version: Version,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(subject, id, version, serde_json::to_value(payload)?))
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Encodes the message for a byte-oriented transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a message received from a byte-oriented transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
