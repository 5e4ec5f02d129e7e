//! Domain event plumbing: event trait, envelope, and pub/sub bus.
//!
//! The reconciliation engines emit events describing committed facts (links
//! recorded, matches computed, tasks dead-lettered). This crate holds the
//! domain-agnostic mechanics; the event payloads themselves live in the
//! engine crates that own them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
