use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("syslog_severity {0} out of range (0-7)")]
    SeverityOutOfRange(i64),

    #[error("invalid match_type `{0}` (expected contains, regex, or oid_prefix)")]
    InvalidMatchType(String),

    #[error("invalid handling `{0}` (expected alert, log, or suppress)")]
    InvalidHandling(String),

    #[error("invalid regex in rule {rule_id}: {source}")]
    InvalidRegex {
        rule_id: i64,
        #[source]
        source: regex::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
