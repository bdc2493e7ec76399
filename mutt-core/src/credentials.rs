//! Dual-credential connection factories.
//!
//! Both backing stores authenticate with a primary password and, when that
//! fails, a secondary. Operators rotate credentials with zero downtime by
//! staging the new password as secondary, rotating the backing service,
//! then promoting. Callers receive one logical handle; the fallback is
//! invisible past this module.

use std::str::FromStr;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{info, warn};
use url::Url;

use crate::error::{PipelineError, Result};

/// Primary/secondary password pair from the secrets provider. Either or
/// both may be absent (e.g. trust-authenticated local development).
#[derive(Clone, Default)]
pub struct Credentials {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("primary", &self.primary.as_ref().map(|_| "<set>"))
            .field("secondary", &self.secondary.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl Credentials {
    /// Passwords to attempt, in order. With neither set, one attempt is
    /// made with whatever the URL itself carries.
    fn attempts(&self) -> Vec<(&'static str, Option<&str>)> {
        match (&self.primary, &self.secondary) {
            (None, None) => vec![("url", None)],
            (primary, secondary) => {
                let mut attempts = Vec::new();
                if let Some(p) = primary {
                    attempts.push(("primary", Some(p.as_str())));
                }
                if let Some(s) = secondary {
                    attempts.push(("secondary", Some(s.as_str())));
                }
                attempts
            }
        }
    }
}

/// Connect a bounded Postgres pool, attempting primary then secondary.
pub async fn connect_postgres(
    url: &str,
    credentials: &Credentials,
    max_connections: u32,
) -> Result<PgPool> {
    let base = PgConnectOptions::from_str(url)
        .map_err(|e| PipelineError::Fatal(format!("invalid database URL: {e}")))?;

    let mut last_err = None;
    for (label, password) in credentials.attempts() {
        let options = match password {
            Some(p) => base.clone().password(p),
            None => base.clone(),
        };

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_with(options)
            .await;

        match pool {
            Ok(pool) => {
                info!("database pool connected with {label} credentials");
                return Ok(pool);
            }
            Err(err) => {
                warn!("database connect with {label} credentials failed: {err}");
                last_err = Some(err);
            }
        }
    }

    Err(PipelineError::Transient(format!(
        "database connection failed with all credentials: {}",
        last_err.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
    )))
}

/// Connect a Redis connection manager, attempting primary then secondary.
pub async fn connect_redis(url: &str, credentials: &Credentials) -> Result<ConnectionManager> {
    let base = Url::parse(url)
        .map_err(|e| PipelineError::Fatal(format!("invalid Redis URL: {e}")))?;

    let mut last_err: Option<redis::RedisError> = None;
    for (label, password) in credentials.attempts() {
        let mut attempt_url = base.clone();
        if let Some(p) = password
            && attempt_url.set_password(Some(p)).is_err()
        {
            return Err(PipelineError::Fatal(
                "Redis URL does not accept a password".to_string(),
            ));
        }

        let client = redis::Client::open(attempt_url.as_str())
            .map_err(|e| PipelineError::Fatal(format!("invalid Redis URL: {e}")))?;

        match ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("shared store connected with {label} credentials");
                return Ok(conn);
            }
            Err(err) => {
                warn!("shared store connect with {label} credentials failed: {err}");
                last_err = Some(err);
            }
        }
    }

    Err(PipelineError::Transient(format!(
        "shared store connection failed with all credentials: {}",
        last_err.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
    )))
}

/// Open a dedicated pub/sub connection, attempting primary then secondary.
/// Pub/sub cannot ride the multiplexed manager, so it gets its own
/// dual-credential path.
pub async fn open_pubsub(url: &str, credentials: &Credentials) -> Result<redis::aio::PubSub> {
    let base = Url::parse(url)
        .map_err(|e| PipelineError::Fatal(format!("invalid Redis URL: {e}")))?;

    let mut last_err: Option<redis::RedisError> = None;
    for (label, password) in credentials.attempts() {
        let mut attempt_url = base.clone();
        if let Some(p) = password
            && attempt_url.set_password(Some(p)).is_err()
        {
            return Err(PipelineError::Fatal(
                "Redis URL does not accept a password".to_string(),
            ));
        }

        let client = redis::Client::open(attempt_url.as_str())
            .map_err(|e| PipelineError::Fatal(format!("invalid Redis URL: {e}")))?;

        match client.get_async_pubsub().await {
            Ok(pubsub) => {
                info!("pub/sub connected with {label} credentials");
                return Ok(pubsub);
            }
            Err(err) => {
                warn!("pub/sub connect with {label} credentials failed: {err}");
                last_err = Some(err);
            }
        }
    }

    Err(PipelineError::Transient(format!(
        "pub/sub connection failed with all credentials: {}",
        last_err.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_order_primary_then_secondary() {
        let creds = Credentials {
            primary: Some("new".into()),
            secondary: Some("old".into()),
        };
        let attempts = creds.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], ("primary", Some("new")));
        assert_eq!(attempts[1], ("secondary", Some("old")));
    }

    #[test]
    fn no_passwords_means_single_url_attempt() {
        let creds = Credentials::default();
        let attempts = creds.attempts();
        assert_eq!(attempts, vec![("url", None)]);
    }

    #[test]
    fn secondary_only_is_still_attempted() {
        let creds = Credentials {
            primary: None,
            secondary: Some("old".into()),
        };
        assert_eq!(creds.attempts(), vec![("secondary", Some("old"))]);
    }

    #[test]
    fn debug_never_prints_passwords() {
        let creds = Credentials {
            primary: Some("hunter2".into()),
            secondary: None,
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
