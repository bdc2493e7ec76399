//! Alerter service: classification worker pool.
//!
//! Consumes the ingest queue, classifies each event against the cached
//! rule set, writes the audit row, and emits forward-ready alerts. Refuses
//! to start when the audit store is unreachable; a silently empty rule
//! cache would misclassify everything.

mod worker;

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use mutt_core::{
    AuditLog, DurableQueue, DynamicConfig, Heartbeat, Janitor, PipelineMetrics, RetryPolicy,
    RuleCache, UnhandledTracker, connect_postgres, connect_redis, dynconfig, keys, open_pubsub,
};

use crate::config::Config;
use crate::health::{self, HealthState};
use crate::service::ServiceFailure;
use crate::shutdown::{self, Shutdown};
use crate::tasks::{WorkerDone, heartbeat_task, janitor_task, worker_id};
use worker::WorkerContext;

pub async fn run(config: Arc<Config>) -> Result<(), ServiceFailure> {
    let metrics = Arc::new(PipelineMetrics::new().map_err(ServiceFailure::init)?);

    let conn = connect_redis(&config.redis.url, &config.redis.credentials)
        .await
        .map_err(ServiceFailure::init)?;
    let pool = connect_postgres(
        &config.database.url,
        &config.database.credentials,
        config.database.max_connections,
    )
    .await
    .map_err(ServiceFailure::init)?;

    let audit = AuditLog::new(pool.clone());
    audit.ping().await.map_err(ServiceFailure::init)?;

    let rules = Arc::new(
        RuleCache::load(pool.clone(), config.alerter.default_team.clone())
            .await
            .map_err(ServiceFailure::init)?,
    );
    metrics.rule_cache_load_success.set(1);

    let dyncfg = DynamicConfig::new(conn.clone());
    let pubsub = open_pubsub(&config.redis.url, &config.redis.credentials)
        .await
        .map_err(ServiceFailure::init)?;

    let shutdown = Shutdown::new();
    shutdown::spawn_signal_listener(shutdown.clone());

    // Immediate refresh when the reload interval itself changes.
    let refresh_notify = Arc::new(Notify::new());
    {
        let notify = Arc::clone(&refresh_notify);
        dyncfg.on_change(dynconfig::options::CACHE_RELOAD_INTERVAL, move |_| {
            notify.notify_one();
        });
    }

    let mut tasks = JoinSet::new();

    {
        let subscriber_cfg = dyncfg.clone();
        let rx = shutdown.subscribe();
        tasks.spawn(async move {
            if let Err(err) = dynconfig::run_subscriber(subscriber_cfg, pubsub, rx).await {
                warn!("config subscriber exited: {err}");
            }
        });
    }

    {
        let state = HealthState {
            service: "alerter",
            conn: conn.clone(),
            db: Some(pool.clone()),
            metrics: Arc::clone(&metrics),
        };
        let port = config.alerter.health_port;
        let stop = shutdown.clone();
        tasks.spawn(async move {
            if let Err(err) = health::serve(state, port, stop).await {
                error!("health listener failed: {err}");
            }
        });
    }

    tasks.spawn(janitor_task(
        Janitor::new(conn.clone(), keys::ROLE_ALERTER, keys::INGEST_QUEUE),
        config.coordination.janitor_interval,
        shutdown.clone(),
    ));

    tasks.spawn(refresh_task(
        Arc::clone(&rules),
        dyncfg.clone(),
        Arc::clone(&metrics),
        refresh_notify,
        shutdown.clone(),
    ));

    let retry = RetryPolicy {
        max_retries: config.alerter.max_retries,
        ..RetryPolicy::default()
    };

    for index in 0..config.alerter.workers {
        let id = worker_id(index);
        let done = WorkerDone::default();

        tasks.spawn(heartbeat_task(
            Heartbeat::new(
                conn.clone(),
                keys::ROLE_ALERTER,
                &id,
                config.coordination.heartbeat_interval,
            ),
            done.clone(),
        ));

        let ctx = WorkerContext {
            worker_id: id.clone(),
            queue: DurableQueue::new(conn.clone(), keys::INGEST_QUEUE, keys::ROLE_ALERTER, &id),
            conn: conn.clone(),
            audit: audit.clone(),
            rules: Arc::clone(&rules),
            dyncfg: dyncfg.clone(),
            unhandled: UnhandledTracker::new(conn.clone()),
            metrics: Arc::clone(&metrics),
            retry: retry.clone(),
            claim_timeout: config.coordination.claim_timeout,
            unhandled_threshold: config.alerter.unhandled_threshold,
            default_team: config.alerter.default_team.clone(),
            shutdown: shutdown.clone(),
        };
        tasks.spawn(async move {
            worker::run_worker(ctx).await;
            done.mark();
        });
    }

    info!(
        "alerter running with {} worker(s), health on port {}",
        config.alerter.workers, config.alerter.health_port
    );

    shutdown.triggered().await;
    info!("alerter draining");
    shutdown::drain(tasks).await;
    Ok(())
}

/// Periodic and signal-driven rule cache refresh. A failed refresh keeps
/// the stale snapshot serving; the gauge reflects the latest attempt.
async fn refresh_task(
    rules: Arc<RuleCache>,
    dyncfg: DynamicConfig,
    metrics: Arc<PipelineMetrics>,
    notify: Arc<Notify>,
    shutdown: Shutdown,
) {
    #[cfg(unix)]
    let mut hangup =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).ok();

    loop {
        let interval = dyncfg.cache_reload_interval().await;

        #[cfg(unix)]
        let on_hangup = async {
            match hangup.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let on_hangup = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = on_hangup => info!("SIGHUP received, refreshing rule cache"),
            _ = notify.notified() => info!("reload interval changed, refreshing rule cache now"),
            _ = shutdown.triggered() => return,
        }

        refresh_once(&rules, &metrics).await;
    }
}

async fn refresh_once(rules: &RuleCache, metrics: &PipelineMetrics) {
    match rules.refresh().await {
        Ok(()) => metrics.rule_cache_load_success.set(1),
        Err(err) => {
            warn!("rule cache refresh failed, serving stale snapshot: {err}");
            metrics.rule_cache_load_success.set(0);
        }
    }
}
