//! Dynamic configuration registry.
//!
//! Options are persisted as strings under `config:<key>` in the shared
//! store, with a pub/sub channel announcing changes. Each process holds a
//! short-TTL local cache; the subscriber task invalidates entries the
//! moment a change lands and runs any callbacks registered for the key.
//! Consumers parse and validate on read, falling back to the documented
//! default when the store is unreachable or the value is malformed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keys;

/// Recognized option keys. Anything else on the change channel is ignored
/// with a warning.
pub mod options {
    pub const ALERTER_QUEUE_WARN_THRESHOLD: &str = "alerter_queue_warn_threshold";
    pub const ALERTER_QUEUE_SHED_THRESHOLD: &str = "alerter_queue_shed_threshold";
    pub const ALERTER_SHED_MODE: &str = "alerter_shed_mode";
    pub const ALERTER_DEFER_SLEEP_MS: &str = "alerter_defer_sleep_ms";
    pub const CACHE_RELOAD_INTERVAL: &str = "cache_reload_interval";
    pub const MOOG_RATE_LIMIT: &str = "moog_rate_limit";
    pub const MOOG_RATE_PERIOD: &str = "moog_rate_period";
    pub const MOOG_CB_FAILURE_THRESHOLD: &str = "moog_cb_failure_threshold";
    pub const MOOG_CB_OPEN_SECONDS: &str = "moog_cb_open_seconds";

    pub const ALL: &[&str] = &[
        ALERTER_QUEUE_WARN_THRESHOLD,
        ALERTER_QUEUE_SHED_THRESHOLD,
        ALERTER_SHED_MODE,
        ALERTER_DEFER_SLEEP_MS,
        CACHE_RELOAD_INTERVAL,
        MOOG_RATE_LIMIT,
        MOOG_RATE_PERIOD,
        MOOG_CB_FAILURE_THRESHOLD,
        MOOG_CB_OPEN_SECONDS,
    ];
}

/// Defaults used when an option is unset or unreadable.
pub mod defaults {
    pub const ALERTER_QUEUE_WARN_THRESHOLD: i64 = 1_000;
    pub const ALERTER_QUEUE_SHED_THRESHOLD: i64 = 5_000;
    pub const ALERTER_DEFER_SLEEP_MS: u64 = 500;
    pub const CACHE_RELOAD_INTERVAL: u64 = 60;
    pub const MOOG_RATE_LIMIT: u64 = 100;
    pub const MOOG_RATE_PERIOD: u64 = 60;
    pub const MOOG_CB_FAILURE_THRESHOLD: u64 = 5;
    pub const MOOG_CB_OPEN_SECONDS: u64 = 60;
}

/// Backpressure policy once the shed threshold is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShedMode {
    /// Pop one ingest event per loop and dead-letter it.
    #[default]
    Dlq,
    /// Sleep, slowing consumption until admission control pushes back.
    Defer,
}

impl ShedMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dlq" => Some(ShedMode::Dlq),
            "defer" => Some(ShedMode::Defer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShedMode::Dlq => "dlq",
            ShedMode::Defer => "defer",
        }
    }
}

const CACHE_TTL: Duration = Duration::from_secs(5);

type ChangeCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct CachedValue {
    value: Option<String>,
    fetched_at: Instant,
}

/// Process-wide dynamic configuration handle. Cheap to clone; all clones
/// share one cache and callback table.
#[derive(Clone)]
pub struct DynamicConfig {
    conn: ConnectionManager,
    cache: Arc<Mutex<HashMap<String, CachedValue>>>,
    callbacks: Arc<Mutex<HashMap<String, Vec<ChangeCallback>>>>,
}

impl std::fmt::Debug for DynamicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicConfig").finish()
    }
}

impl DynamicConfig {
    pub fn new(conn: ConnectionManager) -> Self {
        DynamicConfig {
            conn,
            cache: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Raw value of an option, through the local cache.
    pub async fn get(&self, option: &str) -> Result<Option<String>> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(option)
                && entry.fetched_at.elapsed() < CACHE_TTL
            {
                return Ok(entry.value.clone());
            }
        }

        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::config(option)).await?;

        self.cache.lock().insert(
            option.to_string(),
            CachedValue {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Persist an option and announce the change.
    pub async fn set(&self, option: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(keys::config(option), value).await?;
        conn.publish::<_, _, ()>(keys::CONFIG_CHANNEL, option).await?;
        self.invalidate(option);
        Ok(())
    }

    /// Register a callback run by the subscriber when `option` changes.
    /// Callbacks must be non-blocking.
    pub fn on_change(&self, option: &str, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .entry(option.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn invalidate(&self, option: &str) {
        self.cache.lock().remove(option);
    }

    fn notify(&self, option: &str) {
        if !options::ALL.contains(&option) {
            warn!("ignoring change notification for unknown option `{option}`");
            return;
        }
        self.invalidate(option);

        let callbacks: Vec<ChangeCallback> = self
            .callbacks
            .lock()
            .get(option)
            .map(|list| list.to_vec())
            .unwrap_or_default();
        for callback in callbacks {
            callback(option);
        }
        debug!("invalidated dynamic option `{option}`");
    }

    async fn parsed_or<T: std::str::FromStr>(&self, option: &str, default: T) -> T {
        match self.get(option).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                warn!("option `{option}` has unparseable value `{raw}`, using default");
                default
            }),
            Ok(None) => default,
            Err(err) => {
                warn!("reading option `{option}` failed ({err}), using default");
                default
            }
        }
    }

    pub async fn alerter_queue_warn_threshold(&self) -> i64 {
        self.parsed_or(
            options::ALERTER_QUEUE_WARN_THRESHOLD,
            defaults::ALERTER_QUEUE_WARN_THRESHOLD,
        )
        .await
    }

    pub async fn alerter_queue_shed_threshold(&self) -> i64 {
        self.parsed_or(
            options::ALERTER_QUEUE_SHED_THRESHOLD,
            defaults::ALERTER_QUEUE_SHED_THRESHOLD,
        )
        .await
    }

    pub async fn alerter_shed_mode(&self) -> ShedMode {
        match self.get(options::ALERTER_SHED_MODE).await {
            Ok(Some(raw)) => ShedMode::parse(&raw).unwrap_or_else(|| {
                warn!("unknown shed mode `{raw}`, using dlq");
                ShedMode::Dlq
            }),
            Ok(None) => ShedMode::default(),
            Err(err) => {
                warn!("reading shed mode failed ({err}), using dlq");
                ShedMode::Dlq
            }
        }
    }

    pub async fn alerter_defer_sleep(&self) -> Duration {
        Duration::from_millis(
            self.parsed_or(
                options::ALERTER_DEFER_SLEEP_MS,
                defaults::ALERTER_DEFER_SLEEP_MS,
            )
            .await,
        )
    }

    pub async fn cache_reload_interval(&self) -> Duration {
        Duration::from_secs(
            self.parsed_or(
                options::CACHE_RELOAD_INTERVAL,
                defaults::CACHE_RELOAD_INTERVAL,
            )
            .await
            .max(1),
        )
    }

    pub async fn moog_rate_limit(&self) -> u64 {
        self.parsed_or(options::MOOG_RATE_LIMIT, defaults::MOOG_RATE_LIMIT)
            .await
            .max(1)
    }

    pub async fn moog_rate_period(&self) -> Duration {
        Duration::from_secs(
            self.parsed_or(options::MOOG_RATE_PERIOD, defaults::MOOG_RATE_PERIOD)
                .await
                .max(1),
        )
    }

    pub async fn moog_cb_failure_threshold(&self) -> u64 {
        self.parsed_or(
            options::MOOG_CB_FAILURE_THRESHOLD,
            defaults::MOOG_CB_FAILURE_THRESHOLD,
        )
        .await
        .max(1)
    }

    pub async fn moog_cb_open_seconds(&self) -> u64 {
        self.parsed_or(
            options::MOOG_CB_OPEN_SECONDS,
            defaults::MOOG_CB_OPEN_SECONDS,
        )
        .await
        .max(1)
    }
}

/// Run the change-notification subscriber until shutdown. One task per
/// process; its only job is cache invalidation and callback dispatch.
pub async fn run_subscriber(
    config: DynamicConfig,
    mut pubsub: redis::aio::PubSub,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    pubsub.subscribe(keys::CONFIG_CHANNEL).await?;
    info!("dynamic config subscriber listening on {}", keys::CONFIG_CHANNEL);

    let mut messages = pubsub.on_message();
    loop {
        tokio::select! {
            maybe_msg = messages.next() => {
                let Some(msg) = maybe_msg else {
                    warn!("config change stream closed");
                    return Ok(());
                };
                match msg.get_payload::<String>() {
                    Ok(option) => config.notify(&option),
                    Err(err) => warn!("unreadable config change payload: {err}"),
                }
            }
            _ = shutdown.recv() => {
                debug!("config subscriber shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shed_mode_parses_known_values() {
        assert_eq!(ShedMode::parse("dlq"), Some(ShedMode::Dlq));
        assert_eq!(ShedMode::parse("defer"), Some(ShedMode::Defer));
        assert_eq!(ShedMode::parse("drop"), None);
        assert_eq!(ShedMode::default(), ShedMode::Dlq);
    }

    #[test]
    fn option_list_covers_every_recognized_key() {
        assert_eq!(options::ALL.len(), 9);
        assert!(options::ALL.contains(&options::MOOG_RATE_LIMIT));
        assert!(options::ALL.contains(&options::ALERTER_SHED_MODE));
    }
}
