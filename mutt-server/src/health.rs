//! Standalone health/metrics listener for the worker services.
//!
//! The alerter and forwarder have no request-facing surface of their own,
//! so each runs this small router on its configured health port.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use redis::aio::ConnectionManager;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use mutt_core::PipelineMetrics;

use crate::errors::AppError;
use crate::shutdown::Shutdown;
use crate::versioning;

#[derive(Clone)]
pub struct HealthState {
    pub service: &'static str,
    pub conn: ConnectionManager,
    pub db: Option<PgPool>,
    pub metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthState")
            .field("service", &self.service)
            .finish()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(versioning::version_middleware))
        .with_state(state)
}

/// Serve until shutdown.
pub async fn serve(state: HealthState, port: u16, shutdown: Shutdown) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{} health listener on {addr}", state.service);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await?;
    Ok(())
}

pub async fn health_handler(
    State(state): State<HealthState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut health_status = json!({
        "status": "healthy",
        "service": state.service,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });

    let mut is_unhealthy = false;

    let mut conn = state.conn.clone();
    match redis::cmd("PING").query_async::<String>(&mut conn).await {
        Ok(_) => {
            health_status["checks"]["store"] = json!({"status": "healthy"});
        }
        Err(e) => {
            health_status["checks"]["store"] = json!({
                "status": "unhealthy",
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    if let Some(pool) = &state.db {
        match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => {
                health_status["checks"]["database"] = json!({"status": "healthy"});
            }
            Err(e) => {
                health_status["checks"]["database"] = json!({
                    "status": "unhealthy",
                    "error": e.to_string()
                });
                is_unhealthy = true;
            }
        }
    }

    if is_unhealthy {
        health_status["status"] = json!("unhealthy");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        Ok(Json(health_status))
    }
}

pub async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
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
