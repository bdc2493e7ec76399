//! Background task loops shared by the worker services.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use mutt_core::{Heartbeat, Janitor};

use crate::shutdown::Shutdown;

/// Short unique worker id, stable for the life of the process task.
pub fn worker_id(index: usize) -> String {
    let mut nonce = Uuid::new_v4().simple().to_string();
    nonce.truncate(8);
    format!("w{index}-{nonce}")
}

/// Signals that a worker finished its drain so its heartbeat can stop.
#[derive(Debug, Clone, Default)]
pub struct WorkerDone(Arc<AtomicBool>);

impl WorkerDone {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Beat until the worker reports done. The heartbeat outlives the shutdown
/// signal on purpose: a worker finishing its last claimed message must not
/// look dead to a janitor.
pub async fn heartbeat_task(heartbeat: Heartbeat, done: WorkerDone) {
    loop {
        if let Err(err) = heartbeat.beat().await {
            warn!("heartbeat failed: {err}");
        }
        tokio::time::sleep(heartbeat.interval()).await;
        if done.is_done() {
            if let Err(err) = heartbeat.clear().await {
                warn!("heartbeat clear failed: {err}");
            }
            return;
        }
    }
}

/// Sweep for orphaned processing lists on startup and periodically after.
pub async fn janitor_task(janitor: Janitor, interval: Duration, shutdown: Shutdown) {
    loop {
        match janitor.sweep().await {
            Ok(0) => {}
            Ok(recovered) => info!("janitor sweep recovered {recovered} message(s)"),
            Err(err) => warn!("janitor sweep failed: {err}"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.triggered() => return,
        }
    }
}
