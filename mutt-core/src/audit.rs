//! Audit-log write contract.
//!
//! One row per alerter-processed event into the month-partitioned
//! `event_audit_log`. Insert failures surface as transient errors: the
//! caller leaves the message claimed and retries, so an audit outage never
//! loses events.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mutt_model::Event;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_timestamp: DateTime<Utc>,
    pub ingested_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<Uuid>,
    pub hostname: String,
    pub severity: Option<i16>,
    pub matched_rule_id: Option<i64>,
    pub action: String,
    pub team: Option<String>,
}

impl AuditRecord {
    pub fn for_event(
        event: &Event,
        matched_rule_id: Option<i64>,
        action: &str,
        team: Option<&str>,
    ) -> Self {
        AuditRecord {
            event_timestamp: event.timestamp,
            ingested_at: event.ingested_at,
            correlation_id: event.correlation_id,
            hostname: event.hostname.clone(),
            severity: event.syslog_severity.map(i16::from),
            matched_rule_id,
            action: action.to_string(),
            team: team.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        AuditLog { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_audit_log
                (event_timestamp, ingested_at, correlation_id, hostname,
                 severity, matched_rule_id, action, team)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.event_timestamp)
        .bind(record.ingested_at)
        .bind(record.correlation_id)
        .bind(&record.hostname)
        .bind(record.severity)
        .bind(record.matched_rule_id)
        .bind(&record.action)
        .bind(record.team.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Connectivity probe for health checks and fail-fast startup.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_mirrors_event_fields() {
        let mut event: Event = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "link down on eth0",
            "hostname": "sw1",
            "syslog_severity": 3,
        }))
        .unwrap();
        let id = event.admit();

        let record = AuditRecord::for_event(&event, Some(7), "alert", Some("NetOps"));
        assert_eq!(record.correlation_id, Some(id));
        assert_eq!(record.hostname, "sw1");
        assert_eq!(record.severity, Some(3));
        assert_eq!(record.matched_rule_id, Some(7));
        assert_eq!(record.action, "alert");
        assert_eq!(record.team.as_deref(), Some("NetOps"));
    }

    #[test]
    fn unmatched_record_has_null_rule_and_team() {
        let event: Event = serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": "nothing matches",
            "hostname": "sw1",
        }))
        .unwrap();

        let record = AuditRecord::for_event(&event, None, "no_match", None);
        assert!(record.matched_rule_id.is_none());
        assert!(record.team.is_none());
        assert!(record.severity.is_none());
    }
}
