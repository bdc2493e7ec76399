//! Coordinated shutdown.
//!
//! SIGINT/SIGTERM set a flag and wake every listener. Workers check the
//! flag between iterations and finish the message they hold; they never
//! abandon a claimed message voluntarily. Stragglers past the drain
//! timeout are aborted and their claims recovered by surviving janitors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Shutdown {
            flag: Arc::new(AtomicBool::new(false)),
            notify,
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.notify.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Resolve once shutdown is triggered.
    pub async fn triggered(&self) {
        if self.is_triggered() {
            return;
        }
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }
}

/// Spawn the signal listener that flips the shutdown flag.
pub fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("cannot install SIGTERM handler: {err}");
                        if ctrl_c.await.is_ok() {
                            info!("received ctrl-c, shutting down");
                            shutdown.trigger();
                        }
                        return;
                    }
                };

            tokio::select! {
                _ = ctrl_c => info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c, shutting down");
        }

        shutdown.trigger();
    });
}

/// Wait for every task to finish, bounded by the drain timeout.
pub async fn drain(mut tasks: JoinSet<()>) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("all workers drained");
                return;
            }
            Err(_) => {
                warn!(
                    "drain timeout after {DRAIN_TIMEOUT:?}, aborting {} remaining task(s); \
                     the janitor will recover any claimed messages",
                    tasks.len()
                );
                tasks.abort_all();
                return;
            }
        }
    }
}
