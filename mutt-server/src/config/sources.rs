//! Raw configuration sources.
//!
//! A TOML file supplies the base layer; environment variables overlay it.
//! Secrets (passwords) arrive through env vars or password files only,
//! never through the TOML file itself.

use serde::Deserialize;
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub ingestor: FileIngestorConfig,
    #[serde(default)]
    pub alerter: FileAlerterConfig,
    #[serde(default)]
    pub forwarder: FileForwarderConfig,
    #[serde(default)]
    pub coordination: FileCoordinationConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRedisConfig {
    pub url: Option<String>,
    pub password_file: Option<PathBuf>,
    pub secondary_password_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDatabaseConfig {
    pub url: Option<String>,
    pub password_file: Option<PathBuf>,
    pub secondary_password_file: Option<PathBuf>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileIngestorConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub queue_cap: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAlerterConfig {
    pub workers: Option<usize>,
    pub health_port: Option<u16>,
    pub default_team: Option<String>,
    pub max_retries: Option<u32>,
    pub unhandled_threshold: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileForwarderConfig {
    pub workers: Option<usize>,
    pub health_port: Option<u16>,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCoordinationConfig {
    pub heartbeat_interval_secs: Option<u64>,
    pub claim_timeout_secs: Option<u64>,
    pub janitor_interval_secs: Option<u64>,
}

/// Read one environment variable, treating empty as unset.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}
