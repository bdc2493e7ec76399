//! Webhook egress client and response classification.
//!
//! 2xx is success. 4xx other than 429 is poison: the payload itself is
//! being rejected and retrying cannot help. 429, 5xx, and transport errors
//! are retryable.

use std::time::Duration;

use axum::http::StatusCode;
use tracing::debug;

use mutt_model::OutboundAlert;

#[derive(Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
}

impl std::fmt::Debug for WebhookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookClient").field("url", &self.url).finish()
    }
}

impl WebhookClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(WebhookClient {
            client,
            url: url.to_string(),
        })
    }

    pub async fn post(&self, alert: &OutboundAlert) -> Result<StatusCode, reqwest::Error> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();
        debug!("webhook responded {status} for {}", alert.correlation_id);
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Poison,
    Retryable,
}

pub fn classify_status(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        SendOutcome::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        SendOutcome::Retryable
    } else if status.is_client_error() {
        SendOutcome::Poison
    } else {
        SendOutcome::Retryable
    }
}

/// Metrics label for the response class.
pub fn reason_label(status: StatusCode) -> &'static str {
    if status.is_success() {
        "2xx"
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        "429"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_xx_succeeds() {
        assert_eq!(classify_status(StatusCode::OK), SendOutcome::Success);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), SendOutcome::Success);
    }

    #[test]
    fn four_xx_is_poison_except_429() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), SendOutcome::Poison);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), SendOutcome::Poison);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            SendOutcome::Retryable
        );
    }

    #[test]
    fn five_xx_and_odd_codes_retry() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            SendOutcome::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            SendOutcome::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::MOVED_PERMANENTLY),
            SendOutcome::Retryable
        );
    }

    #[test]
    fn reason_labels_match_classes() {
        assert_eq!(reason_label(StatusCode::OK), "2xx");
        assert_eq!(reason_label(StatusCode::TOO_MANY_REQUESTS), "429");
        assert_eq!(reason_label(StatusCode::GONE), "4xx");
        assert_eq!(reason_label(StatusCode::SERVICE_UNAVAILABLE), "5xx");
    }
}
