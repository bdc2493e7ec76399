//! The per-worker classification loop.
//!
//! Each iteration: check backpressure against the alert queue, claim (or
//! resume) one event, classify, write the audit row, emit the alert, ack.
//! A transient failure aborts the iteration without acking; the claimed
//! message is resumed on the next pass or, if this worker dies, recovered
//! by a janitor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use tracing::{info, warn};

use mutt_core::{
    AuditLog, AuditRecord, Classification, DurableQueue, DynamicConfig, PipelineMetrics,
    Result, RetryPolicy, RuleCache, ShedMode, UnhandledTracker, keys, queue,
};
use mutt_model::{DeadLetter, Event, FailureReason, Handling, OutboundAlert};

use crate::shutdown::Shutdown;

pub struct WorkerContext {
    pub worker_id: String,
    pub queue: DurableQueue,
    pub conn: ConnectionManager,
    pub audit: AuditLog,
    pub rules: Arc<RuleCache>,
    pub dyncfg: DynamicConfig,
    pub unhandled: UnhandledTracker,
    pub metrics: Arc<PipelineMetrics>,
    pub retry: RetryPolicy,
    pub claim_timeout: Duration,
    pub unhandled_threshold: u64,
    pub default_team: String,
    pub shutdown: Shutdown,
}

/// Backpressure decision for one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Normal,
    Warn,
    Shed(ShedMode),
}

pub fn assess_backpressure(
    depth: i64,
    warn_threshold: i64,
    shed_threshold: i64,
    mode: ShedMode,
) -> Backpressure {
    if depth > shed_threshold {
        Backpressure::Shed(mode)
    } else if depth > warn_threshold {
        Backpressure::Warn
    } else {
        Backpressure::Normal
    }
}

pub async fn run_worker(ctx: WorkerContext) {
    info!("alerter worker {} started", ctx.worker_id);
    while !ctx.shutdown.is_triggered() {
        if let Err(err) = iteration(&ctx).await {
            warn!("alerter worker {}: {err}", ctx.worker_id);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    info!("alerter worker {} stopped", ctx.worker_id);
}

async fn iteration(ctx: &WorkerContext) -> Result<()> {
    let depth = queue::queue_depth(&ctx.conn, keys::ALERT_QUEUE).await?;
    ctx.metrics.alerter_queue_depth.set(depth);
    ctx.metrics.alert_queue_depth.set(depth);

    let warn_threshold = ctx.dyncfg.alerter_queue_warn_threshold().await;
    let shed_threshold = ctx.dyncfg.alerter_queue_shed_threshold().await;
    let mode = ctx.dyncfg.alerter_shed_mode().await;

    match assess_backpressure(depth, warn_threshold, shed_threshold, mode) {
        Backpressure::Normal => {}
        Backpressure::Warn => {
            warn!("alert_queue depth {depth} over warn threshold {warn_threshold}");
        }
        Backpressure::Shed(ShedMode::Dlq) => {
            warn!(
                "alert_queue depth {depth} over shed threshold {shed_threshold}, shedding"
            );
            return shed_one(ctx).await;
        }
        Backpressure::Shed(ShedMode::Defer) => {
            let pause = ctx.dyncfg.alerter_defer_sleep().await;
            warn!(
                "alert_queue depth {depth} over shed threshold {shed_threshold}, \
                 deferring {pause:?}"
            );
            ctx.metrics
                .alerter_shed_events_total
                .with_label_values(&["defer"])
                .inc();
            tokio::time::sleep(pause).await;
        }
    }

    // Resume an interrupted claim before taking new work.
    let payload = match ctx.queue.pending().await? {
        Some(payload) => payload,
        None => match ctx.queue.claim(ctx.claim_timeout).await? {
            Some(payload) => payload,
            None => return Ok(()),
        },
    };

    process(ctx, &payload).await
}

/// Deliberate data loss favoring stability: move the oldest ingest-queue
/// event straight to the alerter DLQ.
async fn shed_one(ctx: &WorkerContext) -> Result<()> {
    let Some(payload) = ctx.queue.claim_now().await? else {
        return Ok(());
    };
    let correlation_id = Event::from_wire(&payload)
        .ok()
        .and_then(|event| event.correlation_id);

    let dead_letter = DeadLetter::new(&payload, FailureReason::Shed, 0, correlation_id);
    queue::push_dead_letter(&ctx.conn, keys::ROLE_ALERTER, &dead_letter).await?;
    ctx.queue.ack(&payload).await?;
    ctx.metrics
        .alerter_shed_events_total
        .with_label_values(&["dlq"])
        .inc();
    Ok(())
}

async fn process(ctx: &WorkerContext, payload: &str) -> Result<()> {
    let started = Instant::now();

    let event = match Event::from_wire(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!("dead-lettering unparseable event: {err}");
            let dead_letter = DeadLetter::new(payload, FailureReason::Validation, 0, None);
            queue::push_dead_letter(&ctx.conn, keys::ROLE_ALERTER, &dead_letter).await?;
            ctx.queue.ack(payload).await?;
            return Ok(());
        }
    };

    let classification = ctx.rules.classify(&event);
    let (matched_rule_id, action, team) = match &classification {
        Classification::Matched {
            rule_id,
            handling,
            team,
        } => (Some(*rule_id), handling.as_action(), Some(team.as_str())),
        Classification::Unmatched => (None, "no_match", None),
    };

    let record = AuditRecord::for_event(&event, matched_rule_id, action, team);
    if !write_audit(ctx, payload, &record).await? {
        // Dead-lettered after exhausting audit retries.
        return Ok(());
    }

    match classification {
        Classification::Matched {
            rule_id,
            handling: Handling::Alert,
            team,
        } => {
            let alert = OutboundAlert::from_event(&event, rule_id, &team);
            queue::enqueue(&ctx.conn, keys::ALERT_QUEUE, &alert.to_wire()?).await?;
        }
        Classification::Matched { .. } => {
            // log / suppress: the audit row is the whole outcome.
        }
        Classification::Unmatched => {
            ctx.metrics.unhandled_events_total.inc();
            let triggered = ctx
                .unhandled
                .record(
                    &event.hostname,
                    &event.severity_label(),
                    ctx.unhandled_threshold,
                )
                .await?;
            if let Some(count) = triggered {
                info!(
                    "unhandled threshold crossed for {}:{} ({count} events), \
                     emitting meta-alert",
                    event.hostname,
                    event.severity_label()
                );
                let meta = OutboundAlert::unhandled_meta(
                    &event.hostname,
                    event.syslog_severity,
                    count,
                    &ctx.default_team,
                );
                queue::enqueue(&ctx.conn, keys::ALERT_QUEUE, &meta.to_wire()?).await?;
            }
        }
    }

    ctx.queue.ack(payload).await?;
    ctx.metrics
        .alerter_processing_latency_ms
        .observe(started.elapsed().as_millis() as f64);
    Ok(())
}

/// Insert the audit row with bounded in-place retries. Returns false when
/// the message was dead-lettered instead.
async fn write_audit(ctx: &WorkerContext, payload: &str, record: &AuditRecord) -> Result<bool> {
    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        let result = ctx.audit.insert(record).await;
        ctx.metrics
            .db_write_latency_ms
            .observe(started.elapsed().as_millis() as f64);

        match result {
            Ok(()) => return Ok(true),
            Err(err) => {
                attempt += 1;
                warn!("audit write attempt {attempt} failed: {err}");
                if ctx.retry.exhausted(attempt) {
                    let dead_letter = DeadLetter::new(
                        payload,
                        FailureReason::RetryExhausted,
                        attempt,
                        record.correlation_id,
                    );
                    queue::push_dead_letter(&ctx.conn, keys::ROLE_ALERTER, &dead_letter).await?;
                    ctx.queue.ack(payload).await?;
                    return Ok(false);
                }
                tokio::time::sleep(ctx.retry.delay(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_warn_is_normal() {
        assert_eq!(
            assess_backpressure(10, 100, 500, ShedMode::Dlq),
            Backpressure::Normal
        );
        // Exactly at the warn threshold is still normal.
        assert_eq!(
            assess_backpressure(100, 100, 500, ShedMode::Dlq),
            Backpressure::Normal
        );
    }

    #[test]
    fn over_warn_logs_but_processes() {
        assert_eq!(
            assess_backpressure(101, 100, 500, ShedMode::Dlq),
            Backpressure::Warn
        );
        assert_eq!(
            assess_backpressure(500, 100, 500, ShedMode::Defer),
            Backpressure::Warn
        );
    }

    #[test]
    fn over_shed_carries_the_configured_mode() {
        assert_eq!(
            assess_backpressure(501, 100, 500, ShedMode::Dlq),
            Backpressure::Shed(ShedMode::Dlq)
        );
        assert_eq!(
            assess_backpressure(501, 100, 500, ShedMode::Defer),
            Backpressure::Shed(ShedMode::Defer)
        );
    }
}
