//! Static service configuration.
//!
//! Layered resolution: defaults, then an optional TOML file, then
//! environment variables. The resolved [`Config`] is validated up front so
//! a misconfigured service exits with code 1 before touching either store.

mod sources;

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use mutt_core::{Credentials, RetryPolicy};

use sources::{FileConfig, env_parsed, env_var};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["mutt.toml", "config/mutt.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub credentials: Credentials,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct IngestorSettings {
    pub bind: SocketAddr,
    pub api_key: Option<String>,
    pub queue_cap: i64,
}

#[derive(Debug, Clone)]
pub struct AlerterSettings {
    pub workers: usize,
    pub health_port: u16,
    pub default_team: String,
    pub max_retries: u32,
    pub unhandled_threshold: u64,
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub workers: usize,
    pub health_port: u16,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct CoordinationSettings {
    pub heartbeat_interval: Duration,
    pub claim_timeout: Duration,
    pub janitor_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub ingestor: IngestorSettings,
    pub alerter: AlerterSettings,
    pub forwarder: ForwarderSettings,
    pub coordination: CoordinationSettings,
}

impl Config {
    /// Resolve configuration from defaults, file, and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Config, ConfigError> {
        let file = load_file(config_path)?;
        let config = resolve(file)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.forwarder.webhook_url {
            Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("webhook_url `{url}`: {e}")))?;
        }
        if self.alerter.workers == 0 || self.forwarder.workers == 0 {
            return Err(ConfigError::Invalid(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if self.ingestor.queue_cap <= 0 {
            return Err(ConfigError::Invalid(
                "ingest queue cap must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The ingestor cannot authenticate anyone without a key.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.ingestor.api_key.as_deref().ok_or_else(|| {
            ConfigError::Invalid("MUTT_API_KEY is required for the ingestor".to_string())
        })
    }

    /// The forwarder has nowhere to send without a webhook URL.
    pub fn require_webhook_url(&self) -> Result<&str, ConfigError> {
        self.forwarder.webhook_url.as_deref().ok_or_else(|| {
            ConfigError::Invalid("MUTT_WEBHOOK_URL is required for the forwarder".to_string())
        })
    }
}

fn load_file(config_path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match config_path {
        Some(explicit) => Some(explicit.to_path_buf()),
        None => DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists()),
    };

    let Some(path) = path else {
        debug!("no config file found, using defaults and environment");
        return Ok(FileConfig::default());
    };

    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let parsed = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    debug!("loaded config file {}", path.display());
    Ok(parsed)
}

fn resolve(file: FileConfig) -> Result<Config, ConfigError> {
    let redis = RedisSettings {
        url: env_var("MUTT_REDIS_URL")
            .or(file.redis.url)
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
        credentials: Credentials {
            primary: secret(
                "MUTT_REDIS_PASSWORD",
                file.redis.password_file.as_deref(),
            )?,
            secondary: secret(
                "MUTT_REDIS_PASSWORD_SECONDARY",
                file.redis.secondary_password_file.as_deref(),
            )?,
        },
    };

    let database = DatabaseSettings {
        url: env_var("MUTT_DATABASE_URL")
            .or(file.database.url)
            .unwrap_or_else(|| "postgres://mutt@127.0.0.1/mutt".to_string()),
        credentials: Credentials {
            primary: secret("MUTT_DB_PASSWORD", file.database.password_file.as_deref())?,
            secondary: secret(
                "MUTT_DB_PASSWORD_SECONDARY",
                file.database.secondary_password_file.as_deref(),
            )?,
        },
        max_connections: env_parsed("MUTT_DB_MAX_CONNECTIONS")
            .or(file.database.max_connections)
            .unwrap_or(8),
    };

    let host: IpAddr = env_var("MUTT_INGEST_HOST")
        .or(file.ingestor.host)
        .unwrap_or_else(|| "0.0.0.0".to_string())
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("ingest host: {e}")))?;
    let port: u16 = env_parsed("MUTT_INGEST_PORT")
        .or(file.ingestor.port)
        .unwrap_or(8080);

    let ingestor = IngestorSettings {
        bind: SocketAddr::new(host, port),
        api_key: env_var("MUTT_API_KEY"),
        queue_cap: env_parsed("MUTT_INGEST_QUEUE_CAP")
            .or(file.ingestor.queue_cap)
            .unwrap_or(10_000),
    };

    let alerter = AlerterSettings {
        workers: env_parsed("MUTT_ALERTER_WORKERS")
            .or(file.alerter.workers)
            .unwrap_or(4),
        health_port: env_parsed("MUTT_ALERTER_HEALTH_PORT")
            .or(file.alerter.health_port)
            .unwrap_or(8081),
        default_team: env_var("MUTT_DEFAULT_TEAM")
            .or(file.alerter.default_team)
            .unwrap_or_else(|| "Operations".to_string()),
        max_retries: env_parsed("MUTT_ALERTER_MAX_RETRIES")
            .or(file.alerter.max_retries)
            .unwrap_or(5),
        unhandled_threshold: env_parsed("MUTT_UNHANDLED_THRESHOLD")
            .or(file.alerter.unhandled_threshold)
            .unwrap_or(100),
    };

    let forwarder = ForwarderSettings {
        workers: env_parsed("MUTT_FORWARDER_WORKERS")
            .or(file.forwarder.workers)
            .unwrap_or(4),
        health_port: env_parsed("MUTT_FORWARDER_HEALTH_PORT")
            .or(file.forwarder.health_port)
            .unwrap_or(8082),
        webhook_url: env_var("MUTT_WEBHOOK_URL").or(file.forwarder.webhook_url),
        webhook_timeout: Duration::from_secs(
            env_parsed("MUTT_WEBHOOK_TIMEOUT_SECS")
                .or(file.forwarder.webhook_timeout_secs)
                .unwrap_or(10),
        ),
        retry: RetryPolicy {
            base: Duration::from_millis(
                env_parsed("MUTT_RETRY_BASE_MS")
                    .or(file.forwarder.retry_base_ms)
                    .unwrap_or(500),
            ),
            max_delay: Duration::from_secs(
                env_parsed("MUTT_RETRY_MAX_DELAY_SECS")
                    .or(file.forwarder.retry_max_delay_secs)
                    .unwrap_or(30),
            ),
            max_retries: env_parsed("MUTT_FORWARDER_MAX_RETRIES")
                .or(file.forwarder.max_retries)
                .unwrap_or(5),
        },
    };

    let coordination = CoordinationSettings {
        heartbeat_interval: Duration::from_secs(
            env_parsed("MUTT_HEARTBEAT_INTERVAL_SECS")
                .or(file.coordination.heartbeat_interval_secs)
                .unwrap_or(10),
        ),
        claim_timeout: Duration::from_secs(
            env_parsed("MUTT_CLAIM_TIMEOUT_SECS")
                .or(file.coordination.claim_timeout_secs)
                .unwrap_or(5),
        ),
        janitor_interval: Duration::from_secs(
            env_parsed("MUTT_JANITOR_INTERVAL_SECS")
                .or(file.coordination.janitor_interval_secs)
                .unwrap_or(60),
        ),
    };

    Ok(Config {
        redis,
        database,
        ingestor,
        alerter,
        forwarder,
        coordination,
    })
}

/// A secret comes from its env var or, failing that, a password file.
fn secret(env_name: &str, file: Option<&Path>) -> Result<Option<String>, ConfigError> {
    if let Some(value) = env_var(env_name) {
        return Ok(Some(value));
    }
    let Some(path) = file else { return Ok(None) };
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(contents.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve_without_file() {
        let config = resolve(FileConfig::default()).unwrap();
        assert_eq!(config.ingestor.bind.port(), 8080);
        assert_eq!(config.ingestor.queue_cap, 10_000);
        assert_eq!(config.alerter.workers, 4);
        assert_eq!(config.forwarder.health_port, 8082);
        assert_eq!(config.coordination.heartbeat_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            [redis]
            url = "redis://queue-host:6379"

            [forwarder]
            workers = 8
            health_port = 8084
            webhook_url = "https://moog.example.com/events"

            [coordination]
            claim_timeout_secs = 2
            "#,
        )
        .unwrap();
        let config = resolve(file).unwrap();
        assert_eq!(config.redis.url, "redis://queue-host:6379");
        assert_eq!(config.forwarder.workers, 8);
        assert_eq!(config.forwarder.health_port, 8084);
        assert_eq!(
            config.forwarder.webhook_url.as_deref(),
            Some("https://moog.example.com/events")
        );
        assert_eq!(config.coordination.claim_timeout, Duration::from_secs(2));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[ingestor]\nhots = \"typo\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_webhook_url_fails_validation() {
        let mut config = resolve(FileConfig::default()).unwrap();
        config.forwarder.webhook_url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn password_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();

        let value = secret("MUTT_TEST_UNSET_PASSWORD", Some(file.path())).unwrap();
        assert_eq!(value.as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_password_file_is_an_error() {
        let result = secret(
            "MUTT_TEST_UNSET_PASSWORD",
            Some(Path::new("/nonexistent/password")),
        );
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn api_key_is_required_for_ingestor() {
        let mut config = resolve(FileConfig::default()).unwrap();
        config.ingestor.api_key = None;
        assert!(config.require_api_key().is_err());
        config.ingestor.api_key = Some("key".to_string());
        assert_eq!(config.require_api_key().unwrap(), "key");
    }
}
