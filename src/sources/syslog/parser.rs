//! Syslog parsing via `syslog_loose`: RFC 5424 first, RFC 3164 second,
//! then the loose `<PRI>MSG` fallback. Frames without a valid PRI header
//! carry no facility/severity and are dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use syslog_loose::{IncompleteDate, ProcId, Variant};

use crate::error::ParseError;
use crate::record::SyslogMessage;

/// Hostname used when a message does not carry one.
pub const UNKNOWN_HOST: &str = "unknown";

pub fn parse_message(line: &str, source_ip: &str) -> Result<SyslogMessage, ParseError> {
    parse_message_at(line, source_ip, Utc::now())
}

/// Parse with an explicit "now" for year resolution and fallback
/// timestamps.
pub fn parse_message_at(
    line: &str,
    source_ip: &str,
    now: DateTime<Utc>,
) -> Result<SyslogMessage, ParseError> {
    let line = line.trim();
    let parsed = syslog_loose::parse_message_with_year(
        line,
        |incomplete| resolve_year(incomplete, now),
        Variant::Either,
    );

    // Facility and severity both come from the PRI octet; a frame
    // without one is not syslog.
    let (Some(facility), Some(severity)) = (parsed.facility, parsed.severity) else {
        return Err(ParseError::Malformed {
            field: "pri",
            reason: "missing or invalid priority".into(),
        });
    };

    let structured_data = if parsed.structured_data.is_empty() {
        None
    } else {
        let mut sd = BTreeMap::new();
        for element in parsed.structured_data.into_iter() {
            let mut params = BTreeMap::new();
            for (name, value) in element.params() {
                params.insert(name.to_string(), value.to_string());
            }
            sd.insert(element.id.to_string(), params);
        }
        Some(sd)
    };

    Ok(SyslogMessage {
        facility: facility as u8,
        severity: severity as u8,
        timestamp: parsed
            .timestamp
            .map(DateTime::<Utc>::from)
            .unwrap_or(now),
        hostname: parsed
            .hostname
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_HOST.to_string()),
        app_name: parsed.appname.map(str::to_string),
        proc_id: parsed.procid.map(|procid| match procid {
            ProcId::PID(pid) => pid.to_string(),
            ProcId::Name(name) => name.to_string(),
        }),
        msg_id: parsed.msgid.map(str::to_string),
        structured_data,
        message: parsed.msg.to_string(),
        source_ip: source_ip.to_string(),
    })
}

/// Resolve the year for RFC 3164 timestamps, which don't carry one:
/// the current year, except December messages read in January.
fn resolve_year((month, _date, _hour, _min, _sec): IncompleteDate, now: DateTime<Utc>) -> i32 {
    if now.month() == 1 && month == 12 {
        now.year() - 1
    } else {
        now.year()
    }
}
