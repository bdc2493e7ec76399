//! Core data model definitions shared across MUTT crates.
//!
//! Everything here is plain data: events in flight between pipeline stages,
//! the alert rules they are classified against, the outbound alert payload
//! posted to the incident webhook, and the dead-letter wrapper for messages
//! that exhaust their options. No I/O lives in this crate.

pub mod alert;
pub mod dlq;
pub mod error;
pub mod event;
pub mod rule;

pub use alert::OutboundAlert;
pub use dlq::{DeadLetter, FailureReason};
pub use error::{ModelError, Result as ModelResult};
pub use event::Event;
pub use rule::{AlertRule, Handling, MatchType, select_rule};
