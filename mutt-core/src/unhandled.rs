//! Unhandled-event meta-alerting counters.
//!
//! Events that match no rule bump a per-`(hostname, severity)` counter. At
//! the threshold the counter key is renamed to a triggered sentinel: counts
//! restart from zero and the meta-alert fires exactly once per TTL window.
//! While the sentinel exists further increments accumulate silently.

use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::error::Result;
use crate::keys;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

mod scripts {
    use redis::Script;

    /// Increment-and-refresh in one step; rename to the sentinel at the
    /// threshold. Returns the count that crossed the threshold, or 0 when
    /// no meta-alert should fire.
    pub fn record() -> Script {
        Script::new(
            r#"
            local counter = KEYS[1]
            local sentinel = KEYS[2]
            local ttl = tonumber(ARGV[1])
            local threshold = tonumber(ARGV[2])

            local count = redis.call('INCR', counter)
            redis.call('EXPIRE', counter, ttl)

            if redis.call('EXISTS', sentinel) == 1 then
                return 0
            end

            if count >= threshold then
                redis.call('RENAME', counter, sentinel)
                redis.call('EXPIRE', sentinel, ttl)
                return count
            end
            return 0
            "#,
        )
    }
}

#[derive(Clone)]
pub struct UnhandledTracker {
    conn: ConnectionManager,
    window: Duration,
}

impl std::fmt::Debug for UnhandledTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnhandledTracker")
            .field("window", &self.window)
            .finish()
    }
}

impl UnhandledTracker {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_window(conn, DEFAULT_WINDOW)
    }

    pub fn with_window(conn: ConnectionManager, window: Duration) -> Self {
        UnhandledTracker { conn, window }
    }

    /// Record one unhandled event. Returns `Some(count)` exactly when the
    /// counter crossed `threshold` and a meta-alert should be emitted.
    pub async fn record(
        &self,
        hostname: &str,
        severity_label: &str,
        threshold: u64,
    ) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let triggered: i64 = scripts::record()
            .key(keys::unhandled(hostname, severity_label))
            .key(keys::unhandled_triggered(hostname, severity_label))
            .arg(self.window.as_secs().max(1))
            .arg(threshold.max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok((triggered > 0).then_some(triggered as u64))
    }
}
