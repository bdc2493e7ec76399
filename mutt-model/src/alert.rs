//! Forward-ready alerts.
//!
//! The alerter emits these onto `alert_queue`; the forwarder posts them
//! verbatim as the webhook JSON body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundAlert {
    pub correlation_id: Uuid,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    pub message: String,
    pub team: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<i64>,
    pub source_timestamp: DateTime<Utc>,
}

impl OutboundAlert {
    /// Build the alert for a classified event.
    pub fn from_event(event: &Event, matched_rule_id: i64, team: &str) -> Self {
        OutboundAlert {
            correlation_id: event.correlation_id.unwrap_or_else(Uuid::new_v4),
            hostname: event.hostname.clone(),
            severity: event.syslog_severity,
            message: event.message.clone(),
            team: team.to_string(),
            matched_rule_id: Some(matched_rule_id),
            source_timestamp: event.timestamp,
        }
    }

    /// Synthetic meta-alert emitted when the unhandled-event counter for a
    /// `(hostname, severity)` pair crosses its threshold.
    pub fn unhandled_meta(hostname: &str, severity: Option<u8>, count: u64, team: &str) -> Self {
        OutboundAlert {
            correlation_id: Uuid::new_v4(),
            hostname: hostname.to_string(),
            severity,
            message: format!(
                "{count} unhandled events from {hostname} (severity {}) in the current window",
                severity.map_or_else(|| "none".to_string(), |s| s.to_string()),
            ),
            team: team.to_string(),
            matched_rule_id: None,
            source_timestamp: Utc::now(),
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn admitted_event() -> Event {
        let mut event: Event = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "link down on eth0",
            "hostname": "sw1",
            "syslog_severity": 3,
        }))
        .unwrap();
        event.admit();
        event
    }

    #[test]
    fn from_event_carries_pipeline_fields() {
        let event = admitted_event();
        let alert = OutboundAlert::from_event(&event, 7, "NetOps");

        assert_eq!(alert.correlation_id, event.correlation_id.unwrap());
        assert_eq!(alert.hostname, "sw1");
        assert_eq!(alert.severity, Some(3));
        assert_eq!(alert.message, "link down on eth0");
        assert_eq!(alert.team, "NetOps");
        assert_eq!(alert.matched_rule_id, Some(7));
        assert_eq!(alert.source_timestamp, event.timestamp);
    }

    #[test]
    fn round_trip_is_identity() {
        let alert = OutboundAlert::from_event(&admitted_event(), 7, "NetOps");
        let back = OutboundAlert::from_wire(&alert.to_wire().unwrap()).unwrap();
        assert_eq!(alert, back);
    }

    #[test]
    fn meta_alert_has_no_rule_id() {
        let alert = OutboundAlert::unhandled_meta("unknown", Some(4), 100, "Ops");
        assert!(alert.matched_rule_id.is_none());
        assert!(alert.message.contains("100 unhandled events"));
        assert!(alert.message.contains("severity 4"));
    }
}
