//! Shared-store key conventions.
//!
//! Every queue and coordination key name is built here so the janitor's
//! name-based recovery and the operator tooling agree on one vocabulary.

pub const INGEST_QUEUE: &str = "ingest_queue";
pub const ALERT_QUEUE: &str = "alert_queue";

pub const ROLE_ALERTER: &str = "alerter";
pub const ROLE_FORWARDER: &str = "forwarder";

pub const RATE_LIMIT_FORWARDER: &str = "rate_limit:forwarder";
pub const CIRCUIT_FAILURES: &str = "circuit:forwarder:failures";
pub const CIRCUIT_OPEN: &str = "circuit:forwarder:open";

pub const CONFIG_PREFIX: &str = "config:";
pub const CONFIG_CHANNEL: &str = "config:changes";

pub fn processing(role: &str, worker_id: &str) -> String {
    format!("processing:{role}:{worker_id}")
}

pub fn processing_pattern(role: &str) -> String {
    format!("processing:{role}:*")
}

pub fn heartbeat(role: &str, worker_id: &str) -> String {
    format!("heartbeat:{role}:{worker_id}")
}

pub fn dlq(role: &str) -> String {
    format!("dlq:{role}")
}

pub fn unhandled(hostname: &str, severity_label: &str) -> String {
    format!("unhandled:{hostname}:{severity_label}")
}

pub fn unhandled_triggered(hostname: &str, severity_label: &str) -> String {
    format!("unhandled:triggered:{hostname}:{severity_label}")
}

pub fn config(option: &str) -> String {
    format!("{CONFIG_PREFIX}{option}")
}

/// Worker id suffix of a processing-list key, used by the janitor to find
/// the companion heartbeat key.
pub fn worker_id_of_processing(key: &str) -> Option<&str> {
    key.rsplit_once(':').map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(processing("alerter", "w1"), "processing:alerter:w1");
        assert_eq!(heartbeat("forwarder", "w2"), "heartbeat:forwarder:w2");
        assert_eq!(dlq("alerter"), "dlq:alerter");
        assert_eq!(unhandled("sw1", "4"), "unhandled:sw1:4");
        assert_eq!(
            unhandled_triggered("sw1", "4"),
            "unhandled:triggered:sw1:4"
        );
        assert_eq!(config("moog_rate_limit"), "config:moog_rate_limit");
    }

    #[test]
    fn worker_id_extraction() {
        assert_eq!(
            worker_id_of_processing("processing:alerter:w1"),
            Some("w1")
        );
        assert_eq!(worker_id_of_processing("nodelimiter"), None);
    }
}
