//! Prometheus metrics registry.
//!
//! One registry per process, constructed at startup and shared by handle.
//! Every metric in the pipeline catalog is registered eagerly so `/metrics`
//! exposes the full set from the first scrape, zeros included.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;

const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,

    pub ingest_requests_total: IntCounterVec,
    pub moog_requests_total: IntCounterVec,
    pub alerter_shed_events_total: IntCounterVec,
    pub unhandled_events_total: IntCounter,
    pub circuit_trips_total: IntCounter,
    pub circuit_blocked_total: IntCounter,

    pub ingest_queue_depth: IntGauge,
    pub alert_queue_depth: IntGauge,
    pub alerter_queue_depth: IntGauge,
    pub circuit_open: IntGauge,
    pub rule_cache_load_success: IntGauge,

    pub alerter_processing_latency_ms: Histogram,
    pub moog_webhook_latency_ms: Histogram,
    pub db_write_latency_ms: Histogram,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish()
    }
}

fn latency_histogram(name: &str, help: &str) -> prometheus::Result<Histogram> {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS_MS.to_vec()))
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ingest_requests_total = IntCounterVec::new(
            Opts::new("ingest_requests_total", "Ingest API requests"),
            &["status", "reason"],
        )?;
        let moog_requests_total = IntCounterVec::new(
            Opts::new("moog_requests_total", "Webhook delivery attempts"),
            &["status", "reason"],
        )?;
        let alerter_shed_events_total = IntCounterVec::new(
            Opts::new(
                "alerter_shed_events_total",
                "Events shed or deferred under backpressure",
            ),
            &["mode"],
        )?;
        let unhandled_events_total = IntCounter::new(
            "unhandled_events_total",
            "Events that matched no alert rule",
        )?;
        let circuit_trips_total =
            IntCounter::new("circuit_trips_total", "Circuit breaker trips")?;
        let circuit_blocked_total = IntCounter::new(
            "circuit_blocked_total",
            "Sends skipped because the circuit was open",
        )?;

        let ingest_queue_depth =
            IntGauge::new("ingest_queue_depth", "Current ingest_queue length")?;
        let alert_queue_depth =
            IntGauge::new("alert_queue_depth", "Current alert_queue length")?;
        let alerter_queue_depth = IntGauge::new(
            "alerter_queue_depth",
            "alert_queue length as observed by the alerter backpressure check",
        )?;
        let circuit_open = IntGauge::new("circuit_open", "1 while the circuit is open")?;
        let rule_cache_load_success = IntGauge::new(
            "rule_cache_load_success",
            "1 if the most recent rule cache load succeeded",
        )?;

        let alerter_processing_latency_ms = latency_histogram(
            "alerter_processing_latency_ms",
            "Per-event alerter processing latency",
        )?;
        let moog_webhook_latency_ms =
            latency_histogram("moog_webhook_latency_ms", "Webhook POST latency")?;
        let db_write_latency_ms =
            latency_histogram("db_write_latency_ms", "Audit row insert latency")?;

        registry.register(Box::new(ingest_requests_total.clone()))?;
        registry.register(Box::new(moog_requests_total.clone()))?;
        registry.register(Box::new(alerter_shed_events_total.clone()))?;
        registry.register(Box::new(unhandled_events_total.clone()))?;
        registry.register(Box::new(circuit_trips_total.clone()))?;
        registry.register(Box::new(circuit_blocked_total.clone()))?;
        registry.register(Box::new(ingest_queue_depth.clone()))?;
        registry.register(Box::new(alert_queue_depth.clone()))?;
        registry.register(Box::new(alerter_queue_depth.clone()))?;
        registry.register(Box::new(circuit_open.clone()))?;
        registry.register(Box::new(rule_cache_load_success.clone()))?;
        registry.register(Box::new(alerter_processing_latency_ms.clone()))?;
        registry.register(Box::new(moog_webhook_latency_ms.clone()))?;
        registry.register(Box::new(db_write_latency_ms.clone()))?;

        Ok(PipelineMetrics {
            registry,
            ingest_requests_total,
            moog_requests_total,
            alerter_shed_events_total,
            unhandled_events_total,
            circuit_trips_total,
            circuit_blocked_total,
            ingest_queue_depth,
            alert_queue_depth,
            alerter_queue_depth,
            circuit_open,
            rule_cache_load_success,
            alerter_processing_latency_ms,
            moog_webhook_latency_ms,
            db_write_latency_ms,
        })
    }

    /// Text exposition for `GET /metrics`.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_fully_registered() {
        let metrics = PipelineMetrics::new().unwrap();
        // Vec metrics only appear in the exposition once a child exists.
        metrics
            .ingest_requests_total
            .with_label_values(&["accepted", "queued"])
            .inc();
        metrics
            .moog_requests_total
            .with_label_values(&["success", "2xx"])
            .inc();
        metrics
            .alerter_shed_events_total
            .with_label_values(&["defer"])
            .inc();
        let exported = metrics.export().unwrap();

        for name in [
            "ingest_requests_total",
            "moog_requests_total",
            "alerter_shed_events_total",
            "unhandled_events_total",
            "circuit_trips_total",
            "circuit_blocked_total",
            "ingest_queue_depth",
            "alert_queue_depth",
            "alerter_queue_depth",
            "circuit_open",
            "rule_cache_load_success",
            "alerter_processing_latency_ms",
            "moog_webhook_latency_ms",
            "db_write_latency_ms",
        ] {
            assert!(exported.contains(name), "missing metric {name}");
        }
    }

    #[test]
    fn labelled_counters_accept_label_values() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics
            .ingest_requests_total
            .with_label_values(&["rejected", "capacity"])
            .inc();
        metrics
            .alerter_shed_events_total
            .with_label_values(&["dlq"])
            .inc();

        let exported = metrics.export().unwrap();
        assert!(exported.contains(r#"reason="capacity""#));
        assert!(exported.contains(r#"mode="dlq""#));
    }
}
