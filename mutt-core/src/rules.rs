//! Rule cache and event classification.
//!
//! The audit store owns the rules; each alerter process holds a snapshot
//! refreshed on a timer and on signal. The snapshot is immutable once
//! built, so readers take an `Arc` and never contend with a refresh. A
//! failed refresh keeps the stale snapshot serving and tries again on the
//! next tick; a failed *initial* load refuses to start the service.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use mutt_model::{AlertRule, Event, Handling, MatchType, select_rule};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    pub rules: Vec<AlertRule>,
    pub dev_hosts: HashSet<String>,
    pub device_teams: HashMap<String, String>,
    pub loaded_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Classify one event against this snapshot.
    pub fn classify(&self, event: &Event, default_team: &str) -> Classification {
        let Some(rule) = select_rule(&self.rules, event) else {
            return Classification::Unmatched;
        };

        let is_dev = self.dev_hosts.contains(&event.hostname);
        let handling = rule.handling_for(is_dev);

        let team = rule
            .team_assignment
            .clone()
            .or_else(|| self.device_teams.get(&event.hostname).cloned())
            .unwrap_or_else(|| default_team.to_string());

        Classification::Matched {
            rule_id: rule.id,
            handling,
            team,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Matched {
        rule_id: i64,
        handling: Handling,
        team: String,
    },
    Unmatched,
}

pub struct RuleCache {
    pool: PgPool,
    default_team: String,
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.read();
        f.debug_struct("RuleCache")
            .field("rules", &snapshot.rules.len())
            .field("loaded_at", &snapshot.loaded_at)
            .finish()
    }
}

impl RuleCache {
    /// Initial load. Fails fast: an alerter must not start classifying
    /// against an empty cache it could not populate.
    pub async fn load(pool: PgPool, default_team: String) -> Result<Self> {
        let snapshot = fetch_snapshot(&pool).await?;
        info!(
            "rule cache loaded: {} rules, {} dev hosts, {} device teams",
            snapshot.rules.len(),
            snapshot.dev_hosts.len(),
            snapshot.device_teams.len()
        );
        Ok(RuleCache {
            pool,
            default_team,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Refresh from the store, swapping the whole snapshot atomically on
    /// success. On failure the stale snapshot keeps serving.
    pub async fn refresh(&self) -> Result<()> {
        let snapshot = fetch_snapshot(&self.pool).await?;
        info!("rule cache refreshed: {} rules", snapshot.rules.len());
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn classify(&self, event: &Event) -> Classification {
        self.snapshot().classify(event, &self.default_team)
    }

    pub fn default_team(&self) -> &str {
        &self.default_team
    }
}

async fn fetch_snapshot(pool: &PgPool) -> Result<RuleSnapshot> {
    let rule_rows = sqlx::query(
        r#"
        SELECT id, match_string, match_type, syslog_severity, trap_oid,
               priority, prod_handling, dev_handling, team_assignment
        FROM alert_rules
        WHERE is_active
        ORDER BY priority, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::with_capacity(rule_rows.len());
    for row in rule_rows {
        let id: i64 = row.try_get("id")?;
        match compile_rule(&row, id) {
            Ok(rule) => rules.push(rule),
            // One bad rule must not poison the whole cache.
            Err(err) => warn!("skipping rule {id}: {err}"),
        }
    }

    let dev_hosts: HashSet<String> =
        sqlx::query("SELECT hostname FROM development_hosts WHERE is_development")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| row.try_get("hostname"))
            .collect::<std::result::Result<_, sqlx::Error>>()?;

    let device_teams: HashMap<String, String> =
        sqlx::query("SELECT hostname, team FROM device_teams")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok::<_, sqlx::Error>((row.try_get("hostname")?, row.try_get("team")?))
            })
            .collect::<std::result::Result<_, sqlx::Error>>()?;

    Ok(RuleSnapshot {
        rules,
        dev_hosts,
        device_teams,
        loaded_at: Utc::now(),
    })
}

fn compile_rule(row: &sqlx::postgres::PgRow, id: i64) -> Result<AlertRule> {
    let match_string: String = row.try_get("match_string")?;
    let match_type: String = row.try_get("match_type")?;
    let syslog_severity: Option<i16> = row.try_get("syslog_severity")?;
    let trap_oid: Option<String> = row.try_get("trap_oid")?;
    let priority: i32 = row.try_get("priority")?;
    let prod_handling: String = row.try_get("prod_handling")?;
    let dev_handling: String = row.try_get("dev_handling")?;
    let team_assignment: Option<String> = row.try_get("team_assignment")?;

    Ok(AlertRule {
        id,
        matcher: MatchType::from_columns(&match_type, &match_string, id)?,
        syslog_severity: syslog_severity.map(|s| s.clamp(0, 7) as u8),
        trap_oid,
        priority,
        prod_handling: Handling::from_column(&prod_handling)?,
        dev_handling: Handling::from_column(&dev_handling)?,
        team_assignment,
        is_active: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(message: &str, hostname: &str) -> Event {
        serde_json::from_value(json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": message,
            "hostname": hostname,
            "syslog_severity": 3,
        }))
        .unwrap()
    }

    fn rule(id: i64, needle: &str, priority: i32, team: Option<&str>) -> AlertRule {
        AlertRule {
            id,
            matcher: MatchType::Contains(needle.to_string()),
            syslog_severity: None,
            trap_oid: None,
            priority,
            prod_handling: Handling::Alert,
            dev_handling: Handling::Log,
            team_assignment: team.map(str::to_string),
            is_active: true,
        }
    }

    fn snapshot(rules: Vec<AlertRule>) -> RuleSnapshot {
        RuleSnapshot {
            rules,
            dev_hosts: HashSet::from(["dev-sw1".to_string()]),
            device_teams: HashMap::from([("sw9".to_string(), "DC-Ops".to_string())]),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn matched_takes_rule_team_first() {
        let snap = snapshot(vec![rule(1, "down", 10, Some("NetOps"))]);
        let got = snap.classify(&event("link down", "sw9"), "Default");
        assert_eq!(
            got,
            Classification::Matched {
                rule_id: 1,
                handling: Handling::Alert,
                team: "NetOps".to_string()
            }
        );
    }

    #[test]
    fn team_falls_back_to_device_table_then_default() {
        let snap = snapshot(vec![rule(1, "down", 10, None)]);

        let via_device = snap.classify(&event("link down", "sw9"), "Default");
        assert!(matches!(
            via_device,
            Classification::Matched { team, .. } if team == "DC-Ops"
        ));

        let via_default = snap.classify(&event("link down", "sw1"), "Default");
        assert!(matches!(
            via_default,
            Classification::Matched { team, .. } if team == "Default"
        ));
    }

    #[test]
    fn dev_host_gets_dev_handling() {
        let snap = snapshot(vec![rule(1, "down", 10, Some("NetOps"))]);
        let got = snap.classify(&event("link down", "dev-sw1"), "Default");
        assert!(matches!(
            got,
            Classification::Matched { handling: Handling::Log, .. }
        ));
    }

    #[test]
    fn no_applicable_rule_is_unmatched() {
        let snap = snapshot(vec![rule(1, "power supply", 10, None)]);
        assert_eq!(
            snap.classify(&event("link down", "sw1"), "Default"),
            Classification::Unmatched
        );
    }
}
