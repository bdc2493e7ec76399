//! Worker heartbeats and janitor recovery.
//!
//! Each worker refreshes a TTL'd heartbeat key; the TTL is three beat
//! intervals, so one missed beat is tolerated. The janitor scans for
//! processing lists whose companion heartbeat has lapsed and moves their
//! contents back to the source queue. Two janitors recovering the same
//! orphan race harmlessly: the per-element move in the drain script either
//! succeeds once or finds nothing left.

use std::time::Duration;

use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::drain_processing;
use crate::keys;

pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(10);

/// TTL multiplier over the beat interval.
const TTL_FACTOR: u64 = 3;

#[derive(Clone)]
pub struct Heartbeat {
    conn: ConnectionManager,
    key: String,
    interval: Duration,
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat").field("key", &self.key).finish()
    }
}

impl Heartbeat {
    pub fn new(conn: ConnectionManager, role: &str, worker_id: &str, interval: Duration) -> Self {
        Heartbeat {
            conn,
            key: keys::heartbeat(role, worker_id),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Publish one beat. The stored value is informational; liveness is the
    /// key's existence.
    pub async fn beat(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let ttl = self.interval.as_secs().max(1) * TTL_FACTOR;
        conn.set_ex::<_, _, ()>(&self.key, chrono::Utc::now().to_rfc3339(), ttl)
            .await?;
        Ok(())
    }

    /// Drop the heartbeat on clean shutdown so the janitor does not wait a
    /// full TTL before reclaiming anything a surviving worker left behind.
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}

/// Scans a role's processing lists and recovers orphans.
#[derive(Clone)]
pub struct Janitor {
    conn: ConnectionManager,
    role: String,
    source: String,
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor").field("role", &self.role).finish()
    }
}

impl Janitor {
    pub fn new(conn: ConnectionManager, role: &str, source: &str) -> Self {
        Janitor {
            conn,
            role: role.to_string(),
            source: source.to_string(),
        }
    }

    /// One full sweep. Returns the number of messages recovered.
    pub async fn sweep(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = keys::processing_pattern(&self.role);
        let mut recovered = 0u64;

        let mut cursor = 0u64;
        loop {
            let (next_cursor, found): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for processing_key in found {
                let Some(worker_id) = keys::worker_id_of_processing(&processing_key) else {
                    warn!("skipping malformed processing key {processing_key}");
                    continue;
                };

                let alive: bool = conn
                    .exists(keys::heartbeat(&self.role, worker_id))
                    .await?;
                if alive {
                    debug!("worker {worker_id} alive, leaving {processing_key}");
                    continue;
                }

                let moved = drain_processing(&self.conn, &processing_key, &self.source).await?;
                if moved > 0 {
                    info!(
                        "janitor recovered {moved} orphaned message(s) from {processing_key} to {}",
                        self.source
                    );
                    recovered += moved as u64;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(recovered)
    }
}
