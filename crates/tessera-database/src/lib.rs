//! SQLite storage layer for the tessera backend.
//!
//! This crate provides:
//! - `Database`: a sync unit-of-work with explicit transaction control
//! - `AsyncDatabase`: async executor with a dedicated SQLite thread
//! - Versioned migrations
//! - Model types for outbox, delivery queue, and usage tables
//! - Query helpers as free functions over `&rusqlite::Connection`
//!
//! # Two access paths
//!
//! Request-handling code opens a `Database` per logical unit of work and
//! drives transactions explicitly (the outbox row and the business row
//! commit together or not at all). Background loops share a cloned
//! `AsyncDatabase`; a closure needing atomicity runs its whole transaction
//! inside one `call`.

mod db;
mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use db::{Database, IsolationLevel};
pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
