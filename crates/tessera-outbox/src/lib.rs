//! Transactional outbox: durable event capture and dispatch.
//!
//! Writers append event rows inside the same transaction as the
//! business change they describe ([`OutboxStore::append_with`]); the
//! [`OutboxDispatcher`] polls for unpublished rows and routes each to
//! the [`EventPublisher`] registered for its (event type, source) pair.
//! Delivery is at-least-once; handlers must be idempotent.

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod store;
pub mod toggle;

pub use dispatcher::{OutboxArchiver, OutboxDispatcher};
pub use envelope::EventEnvelope;
pub use error::{OutboxError, OutboxResult};
pub use registry::{EventPublisher, PublisherRegistry, PublisherRegistryBuilder};
pub use store::OutboxStore;
pub use toggle::PublishingToggle;
