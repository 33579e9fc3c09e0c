//! Identifier types shared by every ticketing service crate.

pub mod types;

pub use types::{ActorId, EntityId};
