//! Error taxonomy shared across the agent.
//!
//! Strategy errors never cross the collector boundary: they are counted,
//! logged, and surfaced through [`crate::collector::CollectorStatus`].

use snafu::Snafu;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse config file {path}: {source}"))]
    ParseFile {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("invalid value for '{field}': {reason}"))]
    InvalidField { field: String, reason: String },

    #[snafu(display("environment variable '{var}' referenced by '{field}' is not set"))]
    MissingSecret { var: String, field: String },
}

/// A strategy failed to initialize. Fatal for that collector only.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("failed to bind {proto} listener on {addr}: {source}"))]
    Bind {
        proto: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("invalid listener address {addr}: {source}"))]
    ListenerAddr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[snafu(display("{reason}"))]
    Strategy { reason: String },
}

/// One target's collection attempt failed. Retried per policy, then
/// surfaced as a per-target error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CollectError {
    #[snafu(display("operation timed out after {ms}ms"))]
    Timeout { ms: u64 },

    #[snafu(display("failed to run {command}: {source}"))]
    Command {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("{command} exited with status {status}: {stderr}"))]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[snafu(display("snmp {op} against {target} failed: {reason}"))]
    Snmp {
        op: &'static str,
        target: String,
        reason: String,
    },

    #[snafu(display("target {id} is not usable by this collector: {reason}"))]
    BadTarget { id: String, reason: String },

    #[snafu(display("active scanning is disabled on this agent"))]
    ActiveScanRefused,

    #[snafu(display("{reason}"))]
    Other { reason: String },
}

impl CollectError {
    /// Whether the retry runner should attempt the operation again.
    /// Everything is retryable in this engine except explicit refusals
    /// and targets that can never succeed as configured.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CollectError::ActiveScanRefused | CollectError::BadTarget { .. }
        )
    }
}

/// Malformed protocol frame. Logged at debug, offending frame dropped.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("frame truncated: need {needed} bytes, have {have}"))]
    Truncated { needed: usize, have: usize },

    #[snafu(display("unsupported {what}: {value}"))]
    Unsupported { what: &'static str, value: u32 },

    #[snafu(display("no cached template {template_id} for exporter {exporter}"))]
    UnknownTemplate {
        template_id: u16,
        exporter: String,
    },

    #[snafu(display("malformed field '{field}': {reason}"))]
    Malformed { field: &'static str, reason: String },
}

/// MQTT delivery failed. Triggers the local-emit fallback, never aborts
/// a poll cycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PublishError {
    #[snafu(display("mqtt client is not connected"))]
    NotConnected,

    #[snafu(display("mqtt publish failed: {reason}"))]
    Mqtt { reason: String },

    #[snafu(display("failed to encode envelope: {source}"))]
    Encode { source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_error_retryability() {
        assert!(CollectError::Timeout { ms: 500 }.is_retryable());
        assert!(CollectError::Other {
            reason: "transient".into()
        }
        .is_retryable());
        assert!(!CollectError::ActiveScanRefused.is_retryable());
        assert!(!CollectError::BadTarget {
            id: "t1".into(),
            reason: "wrong kind".into()
        }
        .is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = CollectError::Timeout { ms: 250 };
        assert_eq!(err.to_string(), "operation timed out after 250ms");

        let err = ParseError::UnknownTemplate {
            template_id: 256,
            exporter: "10.0.0.9".into(),
        };
        assert!(err.to_string().contains("256"));
        assert!(err.to_string().contains("10.0.0.9"));
    }
}
