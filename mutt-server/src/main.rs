//! # MUTT Server
//!
//! Fault-tolerant event pipeline for operational events (syslog, SNMP
//! traps, arbitrary JSON) with rule-based classification and webhook
//! forwarding.
//!
//! ## Overview
//!
//! One binary, three long-running services selected by subcommand:
//!
//! - **ingestor**: HTTP front door that authenticates, validates, applies
//!   admission control, and enqueues raw events.
//! - **alerter**: consumes the ingest queue, classifies events against a
//!   cached rule set, writes the audit log, and emits forward-ready alerts.
//! - **forwarder**: consumes the alert queue and posts to the incident
//!   webhook under a shared rate limit and circuit breaker.
//!
//! ## Architecture
//!
//! The services share two durable Redis queues and a PostgreSQL audit
//! store. Every queue interaction uses the atomic claim/process/ack
//! protocol from `mutt-core`, so a crashed worker's in-flight messages are
//! recovered by heartbeat-driven janitors without loss.

/// Alerter worker pool
mod alerter;

/// Layered static configuration
mod config;

/// HTTP error responses
mod errors;

/// Forwarder worker pool
mod forwarder;

/// Standalone health/metrics listener for the worker services
mod health;

/// Ingest HTTP front door
mod ingestor;

/// Init/runtime failure split for exit codes
mod service;

/// Signal handling and coordinated drain
mod shutdown;

/// Background task loops shared by the worker services
mod tasks;

/// API version negotiation and response headers
mod versioning;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::service::ServiceFailure;

/// Command line arguments for the MUTT pipeline services
#[derive(Parser, Debug)]
#[command(name = "mutt-server")]
#[command(about = "Fault-tolerant event pipeline: ingest, classify, forward")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "MUTT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before configuration
    #[arg(long, env = "MUTT_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    service: Service,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Service {
    /// Run the HTTP ingestion front door
    Ingestor,
    /// Run the classification worker pool
    Alerter,
    /// Run the webhook forwarding worker pool
    Forwarder,
}

impl Service {
    fn name(&self) -> &'static str {
        match self {
            Service::Ingestor => "ingestor",
            Service::Alerter => "alerter",
            Service::Forwarder => "forwarder",
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(path) = &args.env_file {
        let _ = dotenvy::from_path(path);
    } else {
        let _ = dotenvy::dotenv();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args) {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(ServiceFailure::Init(err)) => {
            error!("initialization failed: {err:#}");
            ExitCode::from(1)
        }
        Err(ServiceFailure::Runtime(err)) => {
            error!("fatal runtime error: {err:#}");
            ExitCode::from(2)
        }
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<(), ServiceFailure> {
    info!("starting mutt-server {}", args.service.name());

    let config = Config::load(args.config.as_deref()).map_err(ServiceFailure::init)?;
    let config = Arc::new(config);

    match args.service {
        Service::Ingestor => ingestor::run(config).await,
        Service::Alerter => alerter::run(config).await,
        Service::Forwarder => forwarder::run(config).await,
    }
}
