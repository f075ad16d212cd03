//! SNMP session seam: OID/value model, the net-snmp CLI transport, and a
//! deterministic mock session.
//!
//! The CLI transport shells out to `snmpget`/`snmpwalk` with
//! `-v3 -l authPriv`, the same acquisition model the ARP and Routing
//! strategies use. Credentials are passed per invocation and never
//! logged.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;

use super::super::exec::run_command;
use crate::collector::SnmpAuth;
use crate::error::CollectError;
use crate::net::mac_from_bytes;

/// A dotted object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return None;
        }
        trimmed
            .split('.')
            .map(|seg| seg.parse().ok())
            .collect::<Option<Vec<u32>>>()
            .map(Oid)
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, base: &Oid) -> bool {
        self.0.len() >= base.0.len() && self.0[..base.0.len()] == base.0[..]
    }

    /// Segments following `base`, or `None` when not under it.
    pub fn suffix(&self, base: &Oid) -> Option<&[u32]> {
        if self.starts_with(base) {
            Some(&self.0[base.0.len()..])
        } else {
            None
        }
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    Counter(u64),
    Gauge(u64),
    TimeTicks(u64),
    OctetString(Vec<u8>),
    ObjectId(String),
    IpAddress(Ipv4Addr),
    Null,
}

impl SnmpValue {
    /// UTF-8 text with trailing NULs stripped; lossy on bad sequences.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => {
                let trimmed: &[u8] = match bytes.iter().rposition(|b| *b != 0) {
                    Some(last) => &bytes[..=last],
                    None => &[],
                };
                Some(String::from_utf8_lossy(trimmed).into_owned())
            }
            SnmpValue::ObjectId(oid) => Some(oid.clone()),
            SnmpValue::IpAddress(ip) => Some(ip.to_string()),
            SnmpValue::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Integer(n) if *n >= 0 => Some(*n as u64),
            SnmpValue::Counter(n) | SnmpValue::Gauge(n) | SnmpValue::TimeTicks(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|n| u32::try_from(n).ok())
    }

    /// Canonical MAC, for six-byte physical-address octet strings.
    pub fn as_mac(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => mac_from_bytes(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

/// One long-lived session per target. `get` fetches scalars, `walk`
/// returns every varbind under a base OID.
#[async_trait]
pub trait SnmpSession: Send + Sync {
    async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>, CollectError>;
    async fn walk(&self, base: &Oid) -> Result<Vec<VarBind>, CollectError>;
}

/// net-snmp CLI transport.
pub struct NetSnmpCliSession {
    agent: String,
    auth: SnmpAuth,
    timeout_secs: u64,
}

impl NetSnmpCliSession {
    pub fn new(host: &str, port: u16, auth: SnmpAuth, timeout_ms: u64) -> Self {
        NetSnmpCliSession {
            agent: format!("udp:{host}:{port}"),
            auth,
            timeout_secs: (timeout_ms / 1000).max(1),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-v3".to_string(),
            "-l".to_string(),
            "authPriv".to_string(),
            "-u".to_string(),
            self.auth.sec_name.clone(),
            "-a".to_string(),
            self.auth.auth_protocol.clone(),
            "-A".to_string(),
            self.auth.auth_password.expose().to_string(),
            "-x".to_string(),
            self.auth.priv_protocol.clone(),
            "-X".to_string(),
            self.auth.priv_password.expose().to_string(),
            "-On".to_string(),
            "-t".to_string(),
            self.timeout_secs.to_string(),
            "-r".to_string(),
            "0".to_string(),
            self.agent.clone(),
        ]
    }

    async fn run(&self, program: &str, oids: &[String]) -> Result<Vec<VarBind>, CollectError> {
        let mut args = self.base_args();
        args.extend(oids.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = run_command(program, &arg_refs)
            .await
            .map_err(|e| redact_command_error(e, program, &self.agent))?;
        Ok(stdout.lines().filter_map(parse_varbind_line).collect())
    }
}

/// Command errors echo the invocation, which here carries `-A`/`-X`
/// credentials. Replace it before the error can reach a log line.
fn redact_command_error(err: CollectError, program: &str, agent: &str) -> CollectError {
    let command = format!("{program} <credentials redacted> {agent}");
    match err {
        CollectError::Command { source, .. } => CollectError::Command { command, source },
        CollectError::CommandFailed { status, stderr, .. } => CollectError::CommandFailed {
            command,
            status,
            stderr,
        },
        other => other,
    }
}

#[async_trait]
impl SnmpSession for NetSnmpCliSession {
    async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>, CollectError> {
        let oids: Vec<String> = oids.iter().map(|oid| oid.to_string()).collect();
        self.run("snmpget", &oids).await
    }

    async fn walk(&self, base: &Oid) -> Result<Vec<VarBind>, CollectError> {
        self.run("snmpwalk", &[base.to_string()]).await
    }
}

/// Parse one `-On` output line: `OID = TYPE: VALUE`.
pub fn parse_varbind_line(line: &str) -> Option<VarBind> {
    let (oid_part, value_part) = line.split_once(" = ")?;
    let oid = Oid::parse(oid_part)?;
    let value_part = value_part.trim();

    if value_part.starts_with("No Such Object") || value_part.starts_with("No Such Instance") {
        return None;
    }
    if value_part == "NULL" || value_part == "\"\"" {
        let value = if value_part == "NULL" {
            SnmpValue::Null
        } else {
            SnmpValue::OctetString(Vec::new())
        };
        return Some(VarBind { oid, value });
    }

    let (kind, payload) = value_part.split_once(':')?;
    let payload = payload.trim();
    let value = match kind {
        "INTEGER" => {
            // Enumerated integers print as `up(1)`.
            let digits = match (payload.find('('), payload.find(')')) {
                (Some(open), Some(close)) if open < close => &payload[open + 1..close],
                _ => payload,
            };
            SnmpValue::Integer(digits.parse().ok()?)
        }
        "STRING" => {
            let unquoted = payload.trim_matches('"');
            SnmpValue::OctetString(unquoted.as_bytes().to_vec())
        }
        "Hex-STRING" => {
            let bytes = payload
                .split_whitespace()
                .map(|pair| u8::from_str_radix(pair, 16).ok())
                .collect::<Option<Vec<u8>>>()?;
            SnmpValue::OctetString(bytes)
        }
        "OID" => SnmpValue::ObjectId(payload.to_string()),
        "Timeticks" => {
            let open = payload.find('(')?;
            let close = payload.find(')')?;
            SnmpValue::TimeTicks(payload[open + 1..close].parse().ok()?)
        }
        "Counter32" | "Counter64" => SnmpValue::Counter(payload.parse().ok()?),
        "Gauge32" | "Gauge64" => SnmpValue::Gauge(payload.parse().ok()?),
        "IpAddress" => SnmpValue::IpAddress(payload.parse().ok()?),
        _ => return None,
    };
    Some(VarBind { oid, value })
}

/// In-memory session for tests and `transport: mock` deployments.
#[derive(Default)]
pub struct MockSnmpSession {
    values: HashMap<String, SnmpValue>,
    walks: HashMap<String, Vec<VarBind>>,
}

impl MockSnmpSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, oid: &str, value: SnmpValue) -> Self {
        self.values.insert(
            Oid::parse(oid).expect("bad oid in fixture").to_string(),
            value,
        );
        self
    }

    pub fn with_walk(mut self, base: &str, varbinds: Vec<VarBind>) -> Self {
        self.walks.insert(
            Oid::parse(base).expect("bad oid in fixture").to_string(),
            varbinds,
        );
        self
    }

    /// A deterministic device fixture keyed on the host name, so mock
    /// deployments produce stable, distinguishable records.
    pub fn fixture(host: &str) -> Self {
        use super::oids;

        let if_entry = |col: u32, index: u32, value: SnmpValue| VarBind {
            oid: Oid::parse(&format!("{}.{col}.{index}", oids::IF_TABLE_ENTRY))
                .expect("fixture oid"),
            value,
        };

        MockSnmpSession::new()
            .with_value(
                oids::SYS_NAME,
                SnmpValue::OctetString(format!("ot-{host}").into_bytes()),
            )
            .with_value(
                oids::SYS_DESCR,
                SnmpValue::OctetString(b"Mock OT device".to_vec()),
            )
            .with_value(oids::SYS_UPTIME, SnmpValue::TimeTicks(8_640_000))
            .with_value(
                oids::SYS_OBJECT_ID,
                SnmpValue::ObjectId(".1.3.6.1.4.1.4329.6".to_string()),
            )
            .with_walk(
                oids::IF_TABLE_ENTRY,
                vec![
                    if_entry(
                        oids::IF_DESCR_COL,
                        1,
                        SnmpValue::OctetString(b"eth0".to_vec()),
                    ),
                    if_entry(oids::IF_TYPE_COL, 1, SnmpValue::Integer(6)),
                    if_entry(oids::IF_SPEED_COL, 1, SnmpValue::Gauge(100_000_000)),
                    if_entry(
                        oids::IF_PHYS_ADDRESS_COL,
                        1,
                        SnmpValue::OctetString(vec![0x00, 0x1c, 0x06, 0x00, 0x00, 0x01]),
                    ),
                    if_entry(oids::IF_ADMIN_STATUS_COL, 1, SnmpValue::Integer(1)),
                    if_entry(oids::IF_OPER_STATUS_COL, 1, SnmpValue::Integer(1)),
                ],
            )
            .with_walk(oids::LLDP_REM_ENTRY, Vec::new())
            .with_walk(oids::IP_NET_TO_MEDIA_ENTRY, Vec::new())
    }
}

#[async_trait]
impl SnmpSession for MockSnmpSession {
    async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>, CollectError> {
        Ok(oids
            .iter()
            .filter_map(|oid| {
                self.values.get(&oid.to_string()).map(|value| VarBind {
                    oid: oid.clone(),
                    value: value.clone(),
                })
            })
            .collect())
    }

    async fn walk(&self, base: &Oid) -> Result<Vec<VarBind>, CollectError> {
        Ok(self
            .walks
            .get(&base.to_string())
            .cloned()
            .unwrap_or_default())
    }
}
