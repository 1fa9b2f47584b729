//! Asynchronous notification delivery.
//!
//! Notifications are persisted before delivery and survive restarts;
//! a bounded queue wakes the worker pool, retries use exponential
//! backoff, and a circuit breaker sheds load when the downstream
//! endpoint is unhealthy. The [`DeliverySweeper`] closes the gaps the
//! channel can drop.

pub mod backoff;
pub mod breaker;
pub mod error;
pub mod pipeline;
pub mod sweeper;
pub mod transport;

pub use backoff::compute_backoff;
pub use breaker::CircuitBreaker;
pub use error::{NotifyError, NotifyResult};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline};
pub use sweeper::{DeliverySweeper, SweepStats};
pub use transport::{HttpTransport, NotificationTransport};
