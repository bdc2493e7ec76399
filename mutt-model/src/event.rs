//! In-flight operational events.
//!
//! An [`Event`] enters the pipeline as the JSON body of an ingest request,
//! travels both durable queues in its serialized form, and is identical
//! after any serialize/deserialize round trip. Fields the pipeline does not
//! recognize are carried opaquely in `extra`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ModelError, Result};

/// A single operational event (syslog line, SNMP trap, or arbitrary JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source timestamp, ISO-8601.
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub hostname: String,

    /// Syslog severity 0 (emergency) through 7 (debug).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_severity: Option<u8>,

    /// SNMP trap OID, dotted notation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap_oid: Option<String>,

    /// Assigned once at ingress; stable across the whole pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Stamped at ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,

    /// Extension fields carried opaquely end to end.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Validate field constraints beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.message.is_empty() {
            return Err(ModelError::MissingField("message"));
        }
        if self.hostname.is_empty() {
            return Err(ModelError::MissingField("hostname"));
        }
        if let Some(sev) = self.syslog_severity
            && sev > 7
        {
            return Err(ModelError::SeverityOutOfRange(i64::from(sev)));
        }
        Ok(())
    }

    /// Assign a correlation id and stamp the ingestion time. Called exactly
    /// once, by the ingestor, before the event is first enqueued.
    pub fn admit(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.correlation_id = Some(id);
        self.ingested_at = Some(Utc::now());
        id
    }

    /// Severity as it appears in coordination key names: the numeric value,
    /// or `none` when the event carries no severity.
    pub fn severity_label(&self) -> String {
        match self.syslog_severity {
            Some(sev) => sev.to_string(),
            None => "none".to_string(),
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

    fn sample() -> Event {
        serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "link down on eth0",
            "hostname": "sw1",
            "syslog_severity": 3,
            "site": "dc-west"
        }))
        .unwrap()
    }

    #[test]
    fn round_trip_is_identity() {
        let mut event = sample();
        event.admit();

        let wire = event.to_wire().unwrap();
        let back = Event::from_wire(&wire).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn extension_fields_survive() {
        let event = sample();
        assert_eq!(event.extra.get("site"), Some(&json!("dc-west")));

        let wire = event.to_wire().unwrap();
        let back = Event::from_wire(&wire).unwrap();
        assert_eq!(back.extra.get("site"), Some(&json!("dc-west")));
    }

    #[test]
    fn admit_assigns_correlation_and_ingested_at() {
        let mut event = sample();
        assert!(event.correlation_id.is_none());

        let id = event.admit();
        assert_eq!(event.correlation_id, Some(id));
        assert!(event.ingested_at.is_some());
    }

    #[test]
    fn severity_out_of_range_rejected() {
        let mut event = sample();
        event.syslog_severity = Some(8);
        assert!(matches!(
            event.validate(),
            Err(ModelError::SeverityOutOfRange(8))
        ));
    }

    #[test]
    fn missing_required_field_fails_deserialization() {
        let result: std::result::Result<Event, _> = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "no hostname"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn severity_label_handles_absent_severity() {
        let mut event = sample();
        assert_eq!(event.severity_label(), "3");
        event.syslog_severity = None;
        assert_eq!(event.severity_label(), "none");
    }
}
