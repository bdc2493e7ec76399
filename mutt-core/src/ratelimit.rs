//! Shared sliding-window rate limiter.
//!
//! All forwarder workers gate on one sorted set keyed by request timestamp.
//! Trim, count, and conditional add run as a single script, so N concurrent
//! workers can never collectively exceed the limit. A denied caller simply
//! tries again on its next loop iteration; the claimed message is untouched.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::Result;

mod scripts {
    use redis::Script;

    /// Sliding window log: trim entries older than the window, count, and
    /// admit iff under the limit. Scores are epoch milliseconds; members
    /// carry a nonce so concurrent same-millisecond requests all count.
    pub fn sliding_window() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])
            local limit = tonumber(ARGV[3])
            local member = ARGV[4]

            redis.call('ZREMRANGEBYSCORE', key, 0, now - window)

            local current = redis.call('ZCARD', key)
            if current < limit then
                redis.call('ZADD', key, now, member)
                redis.call('PEXPIRE', key, window)
                return {1, current + 1}
            else
                return {0, current}
            end
            "#,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests in the window, including this one when allowed.
    pub current: u64,
}

#[derive(Clone)]
pub struct SharedRateLimiter {
    conn: ConnectionManager,
    key: String,
}

impl std::fmt::Debug for SharedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRateLimiter")
            .field("key", &self.key)
            .finish()
    }
}

impl SharedRateLimiter {
    pub fn new(conn: ConnectionManager, key: &str) -> Self {
        SharedRateLimiter {
            conn,
            key: key.to_string(),
        }
    }

    /// Try to reserve one request slot in the rolling window.
    pub async fn try_acquire(&self, limit: u64, window: Duration) -> Result<RateDecision> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let result: Vec<i64> = scripts::sliding_window()
            .key(&self.key)
            .arg(now_ms)
            .arg(window.as_millis() as i64)
            .arg(limit as i64)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(RateDecision {
            allowed: result.first().copied() == Some(1),
            current: result.get(1).copied().unwrap_or(0).max(0) as u64,
        })
    }
}
