//! Coordination primitives shared by every MUTT worker.
//!
//! The pipeline's durability guarantees live here: the atomic
//! claim/process/ack queue protocol, heartbeat-based crash recovery, the
//! shared rate limiter and circuit breaker, dynamic configuration, and the
//! dual-credential connection factories. All multi-step store mutations run
//! as single Lua scripts so concurrent workers observe them atomically.

pub mod audit;
pub mod circuit;
pub mod credentials;
pub mod dynconfig;
pub mod error;
pub mod heartbeat;
pub mod keys;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod rules;
pub mod unhandled;

pub use audit::{AuditLog, AuditRecord};
pub use circuit::CircuitBreaker;
pub use credentials::{Credentials, connect_postgres, connect_redis, open_pubsub};
pub use dynconfig::{DynamicConfig, ShedMode};
pub use error::{PipelineError, Result};
pub use heartbeat::{Heartbeat, Janitor};
pub use metrics::PipelineMetrics;
pub use queue::DurableQueue;
pub use ratelimit::SharedRateLimiter;
pub use retry::RetryPolicy;
pub use rules::{Classification, RuleCache, RuleSnapshot};
pub use unhandled::UnhandledTracker;
