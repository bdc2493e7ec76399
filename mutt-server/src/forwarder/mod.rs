//! Forwarder service: webhook delivery worker pool.
//!
//! Consumes the alert queue and posts each alert to the incident webhook,
//! under a rate limit and circuit breaker shared across every worker in
//! every forwarder process.

mod webhook;
mod worker;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use mutt_core::{
    CircuitBreaker, DurableQueue, DynamicConfig, Heartbeat, Janitor, PipelineMetrics,
    SharedRateLimiter, connect_redis, dynconfig, keys, open_pubsub,
};

use crate::config::Config;
use crate::health::{self, HealthState};
use crate::service::ServiceFailure;
use crate::shutdown::{self, Shutdown};
use crate::tasks::{WorkerDone, heartbeat_task, janitor_task, worker_id};
use webhook::WebhookClient;
use worker::WorkerContext;

pub async fn run(config: Arc<Config>) -> Result<(), ServiceFailure> {
    let webhook_url = config
        .require_webhook_url()
        .map_err(ServiceFailure::init)?
        .to_string();

    let metrics = Arc::new(PipelineMetrics::new().map_err(ServiceFailure::init)?);
    let conn = connect_redis(&config.redis.url, &config.redis.credentials)
        .await
        .map_err(ServiceFailure::init)?;

    let dyncfg = DynamicConfig::new(conn.clone());
    let pubsub = open_pubsub(&config.redis.url, &config.redis.credentials)
        .await
        .map_err(ServiceFailure::init)?;

    let shutdown = Shutdown::new();
    shutdown::spawn_signal_listener(shutdown.clone());

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
            service: "forwarder",
            conn: conn.clone(),
            db: None,
            metrics: Arc::clone(&metrics),
        };
        let port = config.forwarder.health_port;
        let stop = shutdown.clone();
        tasks.spawn(async move {
            if let Err(err) = health::serve(state, port, stop).await {
                error!("health listener failed: {err}");
            }
        });
    }

    tasks.spawn(janitor_task(
        Janitor::new(conn.clone(), keys::ROLE_FORWARDER, keys::ALERT_QUEUE),
        config.coordination.janitor_interval,
        shutdown.clone(),
    ));

    for index in 0..config.forwarder.workers {
        let id = worker_id(index);
        let done = WorkerDone::default();

        tasks.spawn(heartbeat_task(
            Heartbeat::new(
                conn.clone(),
                keys::ROLE_FORWARDER,
                &id,
                config.coordination.heartbeat_interval,
            ),
            done.clone(),
        ));

        // Each worker owns its HTTP client; connections are reused across
        // sends within a worker.
        let client = WebhookClient::new(&webhook_url, config.forwarder.webhook_timeout)
            .map_err(ServiceFailure::init)?;

        let ctx = WorkerContext {
            worker_id: id.clone(),
            queue: DurableQueue::new(conn.clone(), keys::ALERT_QUEUE, keys::ROLE_FORWARDER, &id),
            conn: conn.clone(),
            dyncfg: dyncfg.clone(),
            limiter: SharedRateLimiter::new(conn.clone(), keys::RATE_LIMIT_FORWARDER),
            breaker: CircuitBreaker::new(conn.clone()),
            webhook: client,
            metrics: Arc::clone(&metrics),
            retry: config.forwarder.retry.clone(),
            claim_timeout: config.coordination.claim_timeout,
            shutdown: shutdown.clone(),
        };
        tasks.spawn(async move {
            worker::run_worker(ctx).await;
            done.mark();
        });
    }

    info!(
        "forwarder running with {} worker(s) against {webhook_url}, health on port {}",
        config.forwarder.workers, config.forwarder.health_port
    );

    shutdown.triggered().await;
    info!("forwarder draining");
    shutdown::drain(tasks).await;
    Ok(())
}
