//! Shared circuit breaker for the webhook downstream.
//!
//! State lives in two store keys: a TTL'd failure counter and an open
//! sentinel whose expiry is the half-open transition. While the sentinel
//! exists workers requeue instead of sending; after it lapses the next send
//! is the probe. Success clears the counter, so only consecutive retryable
//! failures accumulate toward a trip.

use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::warn;

use crate::error::Result;
use crate::keys;

mod scripts {
    use redis::Script;

    /// Count one retryable failure; trip when the threshold is reached.
    /// The counter TTL rolls on every failure so a trickle of old failures
    /// ages out instead of tripping the breaker. The counter survives the
    /// trip and outlives the sentinel: a failed half-open probe finds it
    /// still at the threshold and re-trips in one request.
    pub fn record_failure() -> Script {
        Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            redis.call('EXPIRE', KEYS[1], ARGV[1])
            if count >= tonumber(ARGV[2]) then
                redis.call('SET', KEYS[2], '1', 'EX', ARGV[3])
                return 1
            end
            return 0
            "#,
        )
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    conn: ConnectionManager,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker").finish()
    }
}

impl CircuitBreaker {
    pub fn new(conn: ConnectionManager) -> Self {
        CircuitBreaker { conn }
    }

    /// True while the open sentinel exists; sends must not be attempted.
    pub async fn is_open(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let open: bool = conn.exists(keys::CIRCUIT_OPEN).await?;
        Ok(open)
    }

    /// Record a retryable failure. Returns true when this failure tripped
    /// the breaker (the open sentinel was just set or its TTL reset).
    pub async fn record_failure(&self, failure_threshold: u64, open_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        // Counter TTL is twice the open duration so a half-open probe
        // failure still sees the threshold-level count.
        let tripped: i64 = scripts::record_failure()
            .key(keys::CIRCUIT_FAILURES)
            .key(keys::CIRCUIT_OPEN)
            .arg(open_seconds.max(1) * 2)
            .arg(failure_threshold.max(1))
            .arg(open_seconds.max(1))
            .invoke_async(&mut conn)
            .await?;

        if tripped == 1 {
            warn!(
                "circuit breaker tripped after {failure_threshold} consecutive failures, \
                 open for {open_seconds}s"
            );
        }
        Ok(tripped == 1)
    }

    /// Record a successful send. Clears the failure counter; after a
    /// half-open probe this closes the breaker.
    pub async fn record_success(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::CIRCUIT_FAILURES).await?;
        Ok(())
    }
}
