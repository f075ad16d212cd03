//! Security relevance and drain-time statistics for syslog traffic.

use std::collections::BTreeMap;

use crate::record::{HostCount, SyslogMessage};

/// Messages at or below this severity are security events on their own
/// and are surfaced immediately from the listener task.
pub const HIGH_SEVERITY_MAX: u8 = 3;

/// auth (4), authpriv (10), log audit (13).
pub const SECURITY_FACILITIES: &[u8] = &[4, 10, 13];

/// Case-insensitive substrings that mark a message security-relevant.
pub const SECURITY_KEYWORDS: &[&str] = &[
    "authentication",
    "auth",
    "login",
    "logout",
    "failed",
    "denied",
    "blocked",
    "attack",
    "intrusion",
    "violation",
    "unauthorized",
    "invalid",
    "malicious",
    "suspicious",
    "firewall",
    "iptables",
    "ssh",
    "sudo",
    "root",
];

pub fn is_high_severity(message: &SyslogMessage) -> bool {
    message.severity <= HIGH_SEVERITY_MAX
}

/// True when the severity, the facility, or the message text marks the
/// entry as security-relevant.
pub fn is_security_relevant(message: &SyslogMessage) -> bool {
    if is_high_severity(message) {
        return true;
    }
    if SECURITY_FACILITIES.contains(&message.facility) {
        return true;
    }
    let text = message.message.to_lowercase();
    SECURITY_KEYWORDS.iter().any(|kw| text.contains(kw))
}

pub fn severity_distribution(messages: &[SyslogMessage]) -> BTreeMap<u8, u64> {
    let mut distribution = BTreeMap::new();
    for message in messages {
        *distribution.entry(message.severity).or_insert(0) += 1;
    }
    distribution
}

/// The `limit` busiest hostnames, busiest first; ties break by name so
/// the output is stable.
pub fn top_hosts(messages: &[SyslogMessage], limit: usize) -> Vec<HostCount> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for message in messages {
        *counts.entry(message.hostname.as_str()).or_insert(0) += 1;
    }
    let mut hosts: Vec<HostCount> = counts
        .into_iter()
        .map(|(hostname, count)| HostCount {
            hostname: hostname.to_string(),
            count,
        })
        .collect();
    hosts.sort_by(|a, b| b.count.cmp(&a.count).then(a.hostname.cmp(&b.hostname)));
    hosts.truncate(limit);
    hosts
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn message(facility: u8, severity: u8, hostname: &str, text: &str) -> SyslogMessage {
        SyslogMessage {
            facility,
            severity,
            timestamp: Utc::now(),
            hostname: hostname.to_string(),
            app_name: None,
            proc_id: None,
            msg_id: None,
            structured_data: None,
            message: text.to_string(),
            source_ip: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn high_severity_is_always_relevant() {
        assert!(is_security_relevant(&message(16, 0, "h", "emergency")));
        assert!(is_security_relevant(&message(16, 3, "h", "plain error")));
        assert!(!is_security_relevant(&message(16, 4, "h", "routine warning")));
    }

    #[test]
    fn security_facilities_are_relevant() {
        for facility in [4u8, 10, 13] {
            assert!(is_security_relevant(&message(facility, 6, "h", "anything")));
        }
        assert!(!is_security_relevant(&message(0, 6, "h", "kernel chatter")));
    }

    #[test]
    fn keywords_match_case_insensitively() {
        assert!(is_security_relevant(&message(16, 6, "h", "FAILED password")));
        assert!(is_security_relevant(&message(16, 6, "h", "Sudo session opened")));
        assert!(is_security_relevant(&message(16, 6, "h", "packet Blocked by firewall")));
        assert!(!is_security_relevant(&message(16, 6, "h", "link became ready")));
    }

    #[test]
    fn distribution_counts_by_severity() {
        let messages = vec![
            message(1, 6, "a", "x"),
            message(1, 6, "b", "x"),
            message(1, 2, "c", "x"),
        ];
        let dist = severity_distribution(&messages);
        assert_eq!(dist[&6], 2);
        assert_eq!(dist[&2], 1);
        assert_eq!(dist.len(), 2);
    }

    #[test]
    fn top_hosts_orders_and_truncates() {
        let messages = vec![
            message(1, 6, "busy", "x"),
            message(1, 6, "busy", "x"),
            message(1, 6, "busy", "x"),
            message(1, 6, "beta", "x"),
            message(1, 6, "alpha", "x"),
        ];
        let hosts = top_hosts(&messages, 2);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].hostname, "busy");
        assert_eq!(hosts[0].count, 3);
        // Tie between alpha and beta resolves alphabetically.
        assert_eq!(hosts[1].hostname, "alpha");
    }
}
