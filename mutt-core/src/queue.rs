//! Durable queue protocol.
//!
//! Workers interact with the shared store through an atomic move-and-claim
//! pattern: claim moves the oldest element of the source queue onto the
//! worker's private processing list in one store operation, side effects
//! happen while the message sits claimed, and ack removes the claimed
//! occurrence. A worker that dies mid-flight leaves the message in its
//! processing list for the janitor.
//!
//! Producers `LPUSH`; claims pop the opposite end, so per-queue order is
//! FIFO absent retries. Requeues go back to the producer end of the line.

use std::time::Duration;

use redis::{AsyncCommands, aio::ConnectionManager};

use mutt_model::DeadLetter;

use crate::error::Result;
use crate::keys;

mod scripts {
    use redis::Script;

    /// Remove one claimed occurrence from the processing list and, only if
    /// it was present, put it back at the producer end of the source queue.
    /// Two janitors racing on the same element leave exactly one copy.
    pub fn requeue_claimed() -> Script {
        Script::new(
            r#"
            local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
            if removed > 0 then
                redis.call('LPUSH', KEYS[2], ARGV[1])
            end
            return removed
            "#,
        )
    }

    /// Drain an orphaned processing list back onto its source queue, one
    /// atomic element move at a time.
    pub fn drain_processing() -> Script {
        Script::new(
            r#"
            local moved = 0
            while true do
                local v = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
                if not v then
                    break
                end
                moved = moved + 1
            end
            return moved
            "#,
        )
    }
}

/// A worker's view of one source queue plus its private processing list.
#[derive(Clone)]
pub struct DurableQueue {
    conn: ConnectionManager,
    source: String,
    processing: String,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("source", &self.source)
            .field("processing", &self.processing)
            .finish()
    }
}

impl DurableQueue {
    pub fn new(conn: ConnectionManager, source: &str, role: &str, worker_id: &str) -> Self {
        DurableQueue {
            conn,
            source: source.to_string(),
            processing: keys::processing(role, worker_id),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn processing_key(&self) -> &str {
        &self.processing
    }

    /// Claim the oldest message, blocking up to `timeout`. `None` means the
    /// queue stayed empty for the whole timeout.
    pub async fn claim(&self, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.source)
            .arg(&self.processing)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(claimed)
    }

    /// The oldest message already sitting in this worker's processing list,
    /// if any. Workers resume an un-acked claim before taking new work, so
    /// a message interrupted by a transient failure is retried rather than
    /// parked until the heartbeat lapses.
    pub async fn pending(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let oldest: Option<String> = redis::cmd("LINDEX")
            .arg(&self.processing)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(oldest)
    }

    /// Non-blocking claim, used by the shed path.
    pub async fn claim_now(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(&self.source)
            .arg(&self.processing)
            .query_async(&mut conn)
            .await?;
        Ok(claimed)
    }

    /// Acknowledge a processed message: remove one occurrence from the
    /// processing list by value. Returns false if it was no longer there
    /// (already recovered by a janitor).
    pub async fn ack(&self, payload: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(&self.processing, 1, payload).await?;
        Ok(removed > 0)
    }

    /// Atomically move a claimed message back to the end of the line on the
    /// source queue (circuit-open path). Returns false if the message was
    /// not in the processing list.
    pub async fn requeue_claimed(&self, payload: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = scripts::requeue_claimed()
            .key(&self.processing)
            .key(&self.source)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    /// Current source queue length.
    pub async fn depth(&self) -> Result<i64> {
        queue_depth(&self.conn, &self.source).await
    }
}

/// Drain every element of `processing` back onto `source`. Idempotent under
/// concurrent janitors.
pub(crate) async fn drain_processing(
    conn: &ConnectionManager,
    processing: &str,
    source: &str,
) -> Result<i64> {
    let mut conn = conn.clone();
    let moved: i64 = scripts::drain_processing()
        .key(processing)
        .key(source)
        .invoke_async(&mut conn)
        .await?;
    Ok(moved)
}

/// Enqueue a payload at the producer end. Returns the new queue length.
pub async fn enqueue(conn: &ConnectionManager, queue: &str, payload: &str) -> Result<i64> {
    let mut conn = conn.clone();
    let depth: i64 = conn.lpush(queue, payload).await?;
    Ok(depth)
}

pub async fn queue_depth(conn: &ConnectionManager, queue: &str) -> Result<i64> {
    let mut conn = conn.clone();
    let depth: i64 = conn.llen(queue).await?;
    Ok(depth)
}

/// Wrap and push a terminally failed message onto the role's dead-letter
/// queue.
pub async fn push_dead_letter(
    conn: &ConnectionManager,
    role: &str,
    dead_letter: &DeadLetter,
) -> Result<()> {
    let wire = dead_letter.to_wire()?;
    enqueue(conn, &keys::dlq(role), &wire).await?;
    Ok(())
}
