//! Dead-letter wrappers.
//!
//! Terminally failed messages are wrapped with enough context for an
//! operator replay tool to act on; the original payload is preserved
//! verbatim even when it never parsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Validation,
    RetryExhausted,
    #[serde(rename = "poison_4xx")]
    Poison4xx,
    Shed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_event: Value,
    pub failure_reason: FailureReason,
    pub failed_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl DeadLetter {
    /// Wrap a raw queue payload. Payloads that are not valid JSON (possible
    /// only for validation failures) are preserved as a JSON string.
    pub fn new(
        raw_payload: &str,
        failure_reason: FailureReason,
        attempt_count: u32,
        correlation_id: Option<Uuid>,
    ) -> Self {
        let original_event = serde_json::from_str(raw_payload)
            .unwrap_or_else(|_| Value::String(raw_payload.to_string()));
        DeadLetter {
            original_event,
            failure_reason,
            failed_at: Utc::now(),
            attempt_count,
            correlation_id,
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_wire_names() {
        assert_eq!(
            serde_json::to_value(FailureReason::Validation).unwrap(),
            json!("validation")
        );
        assert_eq!(
            serde_json::to_value(FailureReason::RetryExhausted).unwrap(),
            json!("retry_exhausted")
        );
        assert_eq!(
            serde_json::to_value(FailureReason::Poison4xx).unwrap(),
            json!("poison_4xx")
        );
        assert_eq!(serde_json::to_value(FailureReason::Shed).unwrap(), json!("shed"));
    }

    #[test]
    fn wraps_parseable_payload_as_json() {
        let dl = DeadLetter::new(
            r#"{"hostname":"sw1"}"#,
            FailureReason::RetryExhausted,
            5,
            None,
        );
        assert_eq!(dl.original_event, json!({"hostname": "sw1"}));
        assert_eq!(dl.attempt_count, 5);
    }

    #[test]
    fn preserves_unparseable_payload_verbatim() {
        let dl = DeadLetter::new("not json {", FailureReason::Validation, 0, None);
        assert_eq!(dl.original_event, json!("not json {"));
    }
}
