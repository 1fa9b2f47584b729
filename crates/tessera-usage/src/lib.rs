//! Atomic usage accounting against per-plan limits.

pub mod error;
pub mod ledger;
pub mod limits;

pub use error::{UsageError, UsageResult};
pub use ledger::{LimitDecision, UsageLedger};
pub use limits::{LimitSet, LimitType};
