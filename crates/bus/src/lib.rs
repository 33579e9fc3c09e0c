//! Event bus plumbing shared by every service.
//!
//! - [`EventMessage`] is the wire shape of a domain event: entity id, the
//!   entity version the event produced, a [`Subject`], and a JSON payload.
//! - [`EventBus`] is the injected bus client (publish / subscribe with
//!   at-least-once delivery and no cross-subject ordering).
//! - [`EventPublisher`] wraps a bus with a bounded acknowledgement timeout and
//!   turns failures into warnings once the local write has committed.

pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod publisher;

pub use bus::{EventBus, Subscription};
pub use error::{BusError, PublishError};
pub use memory::InMemoryEventBus;
pub use message::{EventMessage, Subject};
pub use publisher::{Ack, EventPublisher, FailedPublish, PublishOutcome};
