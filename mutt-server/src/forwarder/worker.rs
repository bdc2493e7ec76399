//! The per-worker forwarding loop.
//!
//! Each iteration: claim (or resume) one alert, honor the circuit breaker,
//! take a shared rate-limit slot, then POST with bounded retries. The claim
//! is held across rate-limit waits and retry sleeps; only an ack, a DLQ
//! move, or a circuit requeue releases it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use tracing::{info, warn};

use mutt_core::{
    CircuitBreaker, DurableQueue, DynamicConfig, PipelineMetrics, Result, RetryPolicy,
    SharedRateLimiter, keys, queue,
};
use mutt_model::{DeadLetter, FailureReason, OutboundAlert};

use crate::shutdown::Shutdown;

use super::webhook::{SendOutcome, WebhookClient, classify_status, reason_label};

/// Pause after a circuit-open requeue.
const CIRCUIT_PAUSE: Duration = Duration::from_secs(1);
/// Pause between rate-limit polls.
const RATE_PAUSE: Duration = Duration::from_millis(200);

pub struct WorkerContext {
    pub worker_id: String,
    pub queue: DurableQueue,
    pub conn: ConnectionManager,
    pub dyncfg: DynamicConfig,
    pub limiter: SharedRateLimiter,
    pub breaker: CircuitBreaker,
    pub webhook: WebhookClient,
    pub metrics: Arc<PipelineMetrics>,
    pub retry: RetryPolicy,
    pub claim_timeout: Duration,
    pub shutdown: Shutdown,
}

pub async fn run_worker(ctx: WorkerContext) {
    info!("forwarder worker {} started", ctx.worker_id);
    while !ctx.shutdown.is_triggered() {
        if let Err(err) = iteration(&ctx).await {
            warn!("forwarder worker {}: {err}", ctx.worker_id);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    info!("forwarder worker {} stopped", ctx.worker_id);
}

async fn iteration(ctx: &WorkerContext) -> Result<()> {
    // Resume an interrupted claim before taking new work.
    let payload = match ctx.queue.pending().await? {
        Some(payload) => payload,
        None => match ctx.queue.claim(ctx.claim_timeout).await? {
            Some(payload) => payload,
            None => return Ok(()),
        },
    };

    let alert = match OutboundAlert::from_wire(&payload) {
        Ok(alert) => alert,
        Err(err) => {
            warn!("dead-lettering unparseable alert: {err}");
            let dead_letter = DeadLetter::new(&payload, FailureReason::Validation, 0, None);
            queue::push_dead_letter(&ctx.conn, keys::ROLE_FORWARDER, &dead_letter).await?;
            ctx.queue.ack(&payload).await?;
            return Ok(());
        }
    };

    // While the breaker is open, put the message back at the end of the
    // line instead of burning retries into a known-bad downstream.
    if ctx.breaker.is_open().await? {
        ctx.metrics.circuit_open.set(1);
        ctx.metrics.circuit_blocked_total.inc();
        ctx.queue.requeue_claimed(&payload).await?;
        tokio::time::sleep(CIRCUIT_PAUSE).await;
        return Ok(());
    }
    ctx.metrics.circuit_open.set(0);

    let limit = ctx.dyncfg.moog_rate_limit().await;
    let period = ctx.dyncfg.moog_rate_period().await;

    // At the shared limit: keep the claim and try again next iteration.
    if !ctx.limiter.try_acquire(limit, period).await?.allowed {
        tokio::time::sleep(RATE_PAUSE).await;
        return Ok(());
    }

    send_with_retries(ctx, &payload, &alert, limit, period).await
}

async fn send_with_retries(
    ctx: &WorkerContext,
    payload: &str,
    alert: &OutboundAlert,
    limit: u64,
    period: Duration,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        let response = ctx.webhook.post(alert).await;
        ctx.metrics
            .moog_webhook_latency_ms
            .observe(started.elapsed().as_millis() as f64);

        let (outcome, reason) = match &response {
            Ok(status) => (classify_status(*status), reason_label(*status)),
            Err(_) => (SendOutcome::Retryable, "transport"),
        };

        match outcome {
            SendOutcome::Success => {
                ctx.count("success", reason);
                ctx.breaker.record_success().await?;
                ctx.metrics.circuit_open.set(0);
                ctx.queue.ack(payload).await?;
                return Ok(());
            }
            SendOutcome::Poison => {
                if let Ok(status) = &response {
                    warn!(
                        "webhook rejected alert {} with {status}, dead-lettering",
                        alert.correlation_id
                    );
                }
                ctx.count("poison", reason);
                let dead_letter = DeadLetter::new(
                    payload,
                    FailureReason::Poison4xx,
                    attempt + 1,
                    Some(alert.correlation_id),
                );
                queue::push_dead_letter(&ctx.conn, keys::ROLE_FORWARDER, &dead_letter).await?;
                ctx.queue.ack(payload).await?;
                return Ok(());
            }
            SendOutcome::Retryable => {
                ctx.count("retry", reason);
                attempt += 1;
                if let Err(err) = &response {
                    warn!(
                        "webhook attempt {attempt} for {} failed: {err}",
                        alert.correlation_id
                    );
                }

                let tripped = ctx
                    .breaker
                    .record_failure(
                        ctx.dyncfg.moog_cb_failure_threshold().await,
                        ctx.dyncfg.moog_cb_open_seconds().await,
                    )
                    .await?;
                if tripped {
                    ctx.metrics.circuit_trips_total.inc();
                    ctx.metrics.circuit_open.set(1);
                }

                if ctx.retry.exhausted(attempt) {
                    warn!(
                        "retries exhausted for alert {}, dead-lettering",
                        alert.correlation_id
                    );
                    let dead_letter = DeadLetter::new(
                        payload,
                        FailureReason::RetryExhausted,
                        attempt,
                        Some(alert.correlation_id),
                    );
                    queue::push_dead_letter(&ctx.conn, keys::ROLE_FORWARDER, &dead_letter)
                        .await?;
                    ctx.queue.ack(payload).await?;
                    return Ok(());
                }

                if tripped || ctx.breaker.is_open().await? {
                    ctx.metrics.circuit_blocked_total.inc();
                    ctx.queue.requeue_claimed(payload).await?;
                    return Ok(());
                }

                tokio::time::sleep(ctx.retry.delay(attempt - 1)).await;

                // Every retry attempt passes the shared limiter too.
                loop {
                    if ctx.shutdown.is_triggered() {
                        // Leave the claim; it is resumed or recovered.
                        return Ok(());
                    }
                    if ctx.limiter.try_acquire(limit, period).await?.allowed {
                        break;
                    }
                    tokio::time::sleep(RATE_PAUSE).await;
                }
            }
        }
    }
}

impl WorkerContext {
    fn count(&self, status: &str, reason: &str) {
        self.metrics
            .moog_requests_total
            .with_label_values(&[status, reason])
            .inc();
    }
}
