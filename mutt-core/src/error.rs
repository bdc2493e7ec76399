//! Pipeline error taxonomy.
//!
//! Four terminal classes drive control flow: validation errors DLQ without
//! retry and map to 4xx at the ingest edge, transient errors retry with
//! backoff before the DLQ, poison errors DLQ immediately, and fatal errors
//! end the process. Degraded states (stale rule cache, open breaker) are not
//! errors; workers log them and continue with reduced function.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad input. Never retried; the caller sees a 4xx.
    #[error("validation error: {0}")]
    Validation(String),

    /// Store, database, or webhook trouble that a retry may cure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable downstream rejection (4xx other than 429).
    #[error("poison response: {0}")]
    Poison(String),

    /// Misconfiguration or unrecoverable failure; the process exits nonzero.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        PipelineError::Transient(format!("redis: {err}"))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Transient(format!("database: {err}"))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transient(format!("webhook: {err}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Validation(format!("serialization: {err}"))
    }
}

impl From<mutt_model::ModelError> for PipelineError {
    fn from(err: mutt_model::ModelError) -> Self {
        PipelineError::Validation(err.to_string())
    }
}

impl From<prometheus::Error> for PipelineError {
    fn from(err: prometheus::Error) -> Self {
        PipelineError::Fatal(format!("metrics registry: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(PipelineError::Transient("store".into()).is_retryable());
        assert!(!PipelineError::Validation("bad".into()).is_retryable());
        assert!(!PipelineError::Poison("404".into()).is_retryable());
        assert!(!PipelineError::Fatal("config".into()).is_retryable());
    }

    #[test]
    fn model_errors_map_to_validation() {
        let err: PipelineError = mutt_model::ModelError::MissingField("hostname").into();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn serde_errors_map_to_validation() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PipelineError = parse.into();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
