//! Alert rules and the match predicate they carry.
//!
//! The audit store is the source of truth for rules; each alerter worker
//! holds an in-memory snapshot. Rows arrive as strings and are compiled
//! into [`AlertRule`] values once per cache refresh, so regex compilation
//! never happens on the per-event path.

use std::fmt;

use regex::Regex;

use crate::error::{ModelError, Result};
use crate::event::Event;

/// The match predicate variant of a rule.
#[derive(Debug, Clone)]
pub enum MatchType {
    /// Substring match on `message`.
    Contains(String),
    /// Regex match on `message`, compiled at cache load.
    Regex(Regex),
    /// Prefix match on `trap_oid`.
    OidPrefix(String),
}

impl MatchType {
    /// Build from the `(match_type, match_string)` column pair.
    pub fn from_columns(match_type: &str, match_string: &str, rule_id: i64) -> Result<Self> {
        match match_type {
            "contains" => Ok(MatchType::Contains(match_string.to_string())),
            "regex" => {
                let compiled = Regex::new(match_string)
                    .map_err(|source| ModelError::InvalidRegex { rule_id, source })?;
                Ok(MatchType::Regex(compiled))
            }
            "oid_prefix" => Ok(MatchType::OidPrefix(match_string.to_string())),
            other => Err(ModelError::InvalidMatchType(other.to_string())),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            MatchType::Contains(needle) => event.message.contains(needle.as_str()),
            MatchType::Regex(re) => re.is_match(&event.message),
            MatchType::OidPrefix(prefix) => event
                .trap_oid
                .as_deref()
                .is_some_and(|oid| oid.starts_with(prefix.as_str())),
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Contains(s) => write!(f, "contains:{s}"),
            MatchType::Regex(re) => write!(f, "regex:{}", re.as_str()),
            MatchType::OidPrefix(p) => write!(f, "oid_prefix:{p}"),
        }
    }
}

/// What to do with a matched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// Emit a forward-ready alert.
    Alert,
    /// Audit only.
    Log,
    /// Audit with a suppressed action; no alert.
    Suppress,
}

impl Handling {
    pub fn from_column(value: &str) -> Result<Self> {
        match value {
            "alert" => Ok(Handling::Alert),
            "log" => Ok(Handling::Log),
            "suppress" => Ok(Handling::Suppress),
            other => Err(ModelError::InvalidHandling(other.to_string())),
        }
    }

    /// Action string recorded in the audit log.
    pub fn as_action(&self) -> &'static str {
        match self {
            Handling::Alert => "alert",
            Handling::Log => "log",
            Handling::Suppress => "suppress",
        }
    }
}

/// A compiled alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: i64,
    pub matcher: MatchType,
    /// Additional constraint: only match events with this severity.
    pub syslog_severity: Option<u8>,
    /// Additional constraint: only match events with exactly this trap OID.
    pub trap_oid: Option<String>,
    /// Lower wins.
    pub priority: i32,
    pub prod_handling: Handling,
    pub dev_handling: Handling,
    pub team_assignment: Option<String>,
    pub is_active: bool,
}

impl AlertRule {
    /// Whether this rule applies to the event: the match predicate must
    /// hold, plus any severity or trap-OID constraints the rule sets.
    pub fn applies_to(&self, event: &Event) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(sev) = self.syslog_severity
            && event.syslog_severity != Some(sev)
        {
            return false;
        }
        if let Some(oid) = self.trap_oid.as_deref()
            && event.trap_oid.as_deref() != Some(oid)
        {
            return false;
        }
        self.matcher.matches(event)
    }

    pub fn handling_for(&self, is_development_host: bool) -> Handling {
        if is_development_host {
            self.dev_handling
        } else {
            self.prod_handling
        }
    }
}

/// Deterministic rule selection: the applicable rule with the lowest
/// `priority`, ties broken by lowest `id`.
pub fn select_rule<'a>(rules: &'a [AlertRule], event: &Event) -> Option<&'a AlertRule> {
    rules
        .iter()
        .filter(|rule| rule.applies_to(event))
        .min_by_key(|rule| (rule.priority, rule.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(message: &str, severity: Option<u8>, trap_oid: Option<&str>) -> Event {
        let mut value = json!({
            "timestamp": "2025-11-10T12:00:00Z",
            "message": message,
            "hostname": "sw1",
        });
        if let Some(sev) = severity {
            value["syslog_severity"] = json!(sev);
        }
        if let Some(oid) = trap_oid {
            value["trap_oid"] = json!(oid);
        }
        serde_json::from_value(value).unwrap()
    }

    fn rule(id: i64, matcher: MatchType, priority: i32) -> AlertRule {
        AlertRule {
            id,
            matcher,
            syslog_severity: None,
            trap_oid: None,
            priority,
            prod_handling: Handling::Alert,
            dev_handling: Handling::Log,
            team_assignment: None,
            is_active: true,
        }
    }

    #[test]
    fn contains_matches_substring() {
        let r = rule(1, MatchType::Contains("link down".into()), 50);
        assert!(r.applies_to(&event("link down on eth0", Some(3), None)));
        assert!(!r.applies_to(&event("link up on eth0", Some(3), None)));
    }

    #[test]
    fn regex_matches_message() {
        let r = rule(
            1,
            MatchType::from_columns("regex", r"eth\d+", 1).unwrap(),
            50,
        );
        assert!(r.applies_to(&event("link down on eth0", None, None)));
        assert!(!r.applies_to(&event("link down on lo", None, None)));
    }

    #[test]
    fn oid_prefix_matches_trap_oid() {
        let r = rule(1, MatchType::OidPrefix("1.3.6.1.4".into()), 50);
        assert!(r.applies_to(&event("trap", None, Some("1.3.6.1.4.1.9"))));
        assert!(!r.applies_to(&event("trap", None, Some("1.3.6.1.2.1"))));
        assert!(!r.applies_to(&event("trap", None, None)));
    }

    #[test]
    fn severity_constraint_filters() {
        let mut r = rule(1, MatchType::Contains("down".into()), 50);
        r.syslog_severity = Some(3);
        assert!(r.applies_to(&event("down", Some(3), None)));
        assert!(!r.applies_to(&event("down", Some(4), None)));
        assert!(!r.applies_to(&event("down", None, None)));
    }

    #[test]
    fn inactive_rule_never_applies() {
        let mut r = rule(1, MatchType::Contains("down".into()), 50);
        r.is_active = false;
        assert!(!r.applies_to(&event("down", None, None)));
    }

    #[test]
    fn selection_prefers_lowest_priority_then_lowest_id() {
        let rules = vec![
            rule(30, MatchType::Contains("down".into()), 50),
            rule(10, MatchType::Contains("down".into()), 10),
            rule(5, MatchType::Contains("down".into()), 10),
            rule(1, MatchType::Contains("nomatch".into()), 1),
        ];
        let ev = event("link down", None, None);
        let selected = select_rule(&rules, &ev).unwrap();
        assert_eq!(selected.id, 5);
    }

    #[test]
    fn selection_empty_when_nothing_applies() {
        let rules = vec![rule(1, MatchType::Contains("nomatch".into()), 1)];
        assert!(select_rule(&rules, &event("link down", None, None)).is_none());
    }

    #[test]
    fn bad_match_type_rejected() {
        assert!(matches!(
            MatchType::from_columns("glob", "*", 7),
            Err(ModelError::InvalidMatchType(_))
        ));
    }

    #[test]
    fn bad_regex_carries_rule_id() {
        match MatchType::from_columns("regex", "(", 42) {
            Err(ModelError::InvalidRegex { rule_id, .. }) => assert_eq!(rule_id, 42),
            other => panic!("expected InvalidRegex, got {other:?}"),
        }
    }

    #[test]
    fn handling_parses_known_values() {
        assert_eq!(Handling::from_column("alert").unwrap(), Handling::Alert);
        assert_eq!(Handling::from_column("log").unwrap(), Handling::Log);
        assert_eq!(
            Handling::from_column("suppress").unwrap(),
            Handling::Suppress
        );
        assert!(Handling::from_column("drop").is_err());
    }
}
