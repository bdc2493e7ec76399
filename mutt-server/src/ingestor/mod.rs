//! Ingest HTTP front door.
//!
//! Authenticates with a static API key, validates the event body, applies
//! admission-control backpressure against the ingest queue depth, assigns
//! the correlation id, and enqueues. Writes no persistent state of its own.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use mutt_core::{PipelineMetrics, connect_redis, keys, queue};
use mutt_model::Event;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::service::ServiceFailure;
use crate::shutdown::{self, Shutdown};
use crate::versioning;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Clone)]
pub struct AppState {
    pub conn: redis::aio::ConnectionManager,
    pub config: Arc<Config>,
    pub api_key: String,
    pub metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

pub async fn run(config: Arc<Config>) -> Result<(), ServiceFailure> {
    let api_key = config
        .require_api_key()
        .map_err(ServiceFailure::init)?
        .to_string();

    let metrics = Arc::new(PipelineMetrics::new().map_err(ServiceFailure::init)?);
    let conn = connect_redis(&config.redis.url, &config.redis.credentials)
        .await
        .map_err(ServiceFailure::init)?;

    let shutdown = Shutdown::new();
    shutdown::spawn_signal_listener(shutdown.clone());

    // Keep the queue-depth gauges honest even when no requests arrive.
    tokio::spawn(depth_sampler(
        conn.clone(),
        Arc::clone(&metrics),
        shutdown.clone(),
    ));

    let state = AppState {
        conn,
        config: Arc::clone(&config),
        api_key,
        metrics,
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.ingestor.bind)
        .await
        .map_err(ServiceFailure::init)?;
    info!("ingestor listening on {}", config.ingestor.bind);

    let drain = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain.triggered().await })
        .await
        .map_err(ServiceFailure::runtime)?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let deprecated_v1 = Router::new()
        .route("/api/v1/ingest", post(ingest_handler))
        .layer(middleware::from_fn(versioning::deprecated_v1_middleware));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v2/ingest", post(ingest_handler))
        .merge(deprecated_v1)
        .layer(middleware::from_fn(versioning::version_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "MUTT event pipeline ingestor",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<Value>> {
    let provided_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided_key != Some(state.api_key.as_str()) {
        state.count("rejected", "unauthorized");
        return Err(AppError::unauthorized("missing or invalid API key"));
    }

    let mut event: Event = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(err) => {
            debug!("rejecting malformed event: {err}");
            state.count("rejected", "bad_request");
            return Err(AppError::bad_request(format!("invalid event body: {err}")));
        }
    };
    if let Err(err) = event.validate() {
        state.count("rejected", "bad_request");
        return Err(AppError::bad_request(err.to_string()));
    }

    // Admission control: a full queue pushes back on the sender rather
    // than growing without bound.
    let depth = match queue::queue_depth(&state.conn, keys::INGEST_QUEUE).await {
        Ok(depth) => depth,
        Err(err) => {
            state.count("rejected", "store_unavailable");
            return Err(AppError::unavailable(err.to_string()));
        }
    };
    state.metrics.ingest_queue_depth.set(depth);
    if depth > state.config.ingestor.queue_cap {
        warn!(
            "ingest queue at {depth} (cap {}), shedding request",
            state.config.ingestor.queue_cap
        );
        state.count("rejected", "capacity");
        return Err(AppError::unavailable("ingest queue at capacity"));
    }

    let correlation_id = event.admit();
    let wire = event.to_wire().map_err(|e| {
        state.count("rejected", "bad_request");
        AppError::bad_request(e.to_string())
    })?;

    let new_depth = match queue::enqueue(&state.conn, keys::INGEST_QUEUE, &wire).await {
        Ok(depth) => depth,
        Err(err) => {
            state.count("rejected", "store_unavailable");
            return Err(AppError::unavailable(err.to_string()));
        }
    };
    state.metrics.ingest_queue_depth.set(new_depth);
    state.count("accepted", "queued");

    Ok(Json(json!({
        "status": "queued",
        "correlation_id": correlation_id,
        "queue_depth": new_depth,
    })))
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let mut conn = state.conn.clone();
    match redis::cmd("PING").query_async::<String>(&mut conn).await {
        Ok(_) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "checks": { "store": { "status": "healthy" } }
        }))),
        Err(e) => {
            warn!("health check failed: {e}");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => AppError::internal(err.to_string()).into_response(),
    }
}

impl AppState {
    fn count(&self, status: &str, reason: &str) {
        self.metrics
            .ingest_requests_total
            .with_label_values(&[status, reason])
            .inc();
    }
}

/// Periodic queue-depth gauge refresh.
async fn depth_sampler(
    conn: redis::aio::ConnectionManager,
    metrics: Arc<PipelineMetrics>,
    shutdown: Shutdown,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Ok(depth) = queue::queue_depth(&conn, keys::INGEST_QUEUE).await {
                    metrics.ingest_queue_depth.set(depth);
                }
                if let Ok(depth) = queue::queue_depth(&conn, keys::ALERT_QUEUE).await {
                    metrics.alert_queue_depth.set(depth);
                }
            }
            _ = shutdown.triggered() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_body_validation_matches_contract() {
        // Required fields present: parses and validates.
        let ok: Event = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "link down on eth0",
            "hostname": "sw1",
            "syslog_severity": 3,
        }))
        .unwrap();
        assert!(ok.validate().is_ok());

        // Missing hostname: fails at parse time.
        assert!(
            serde_json::from_value::<Event>(json!({
                "timestamp": "2025-11-10T12:00:00Z",
                "message": "link down",
            }))
            .is_err()
        );

        // Severity out of range: parses but fails validation.
        let bad: Event = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "link down",
            "hostname": "sw1",
            "syslog_severity": 9,
        }))
        .unwrap();
        assert!(bad.validate().is_err());
    }
}
