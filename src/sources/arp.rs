//! ARP collection: scrape the OS neighbor table and normalize entries.
//!
//! The command and line shape differ per platform (`ip neigh show` on
//! Linux, `arp -an` on macOS/BSD, `arp -a` on Windows); all three parsers
//! are always compiled so fixtures from any platform stay testable.

use async_trait::async_trait;
use tracing::debug;

use super::exec::run_command;
use crate::collector::{SourceStrategy, Target, TargetSpec};
use crate::config::ArpCollectType;
use crate::error::{CollectError, InitError};
use crate::net::{normalize_mac, Cidr};
use crate::record::{ArpEntry, ArpEntryKind, RecordData, TelemetryRecord, TelemetrySource};

pub struct ArpStrategy;

impl ArpStrategy {
    pub fn new() -> Self {
        ArpStrategy
    }

    async fn neighbor_table(&self, interface: Option<&str>) -> Result<Vec<ArpEntry>, CollectError> {
        match std::env::consts::OS {
            "linux" => {
                let mut args = vec!["neigh", "show"];
                if let Some(dev) = interface {
                    args.extend(["dev", dev]);
                }
                let stdout = run_command("ip", &args).await?;
                Ok(parse_ip_neigh_output(&stdout, interface))
            }
            "macos" | "freebsd" | "openbsd" | "netbsd" => {
                let stdout = run_command("arp", &["-an"]).await?;
                Ok(parse_arp_an_output(&stdout))
            }
            "windows" => {
                let stdout = run_command("arp", &["-a"]).await?;
                Ok(parse_arp_a_output(&stdout))
            }
            other => Err(CollectError::Other {
                reason: format!("no neighbor-table command known for OS {other}"),
            }),
        }
    }

    /// Passive subnet discovery: the subset of the local neighbor table
    /// inside `cidr`. Active scanning is refused outright.
    pub async fn discover_subnet(
        &self,
        cidr: &str,
        passive: bool,
    ) -> Result<Vec<ArpEntry>, CollectError> {
        if !passive {
            return Err(CollectError::ActiveScanRefused);
        }
        let block = Cidr::parse(cidr).map_err(|e| CollectError::Other {
            reason: e.to_string(),
        })?;
        let entries = self.neighbor_table(None).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                entry
                    .ip_address
                    .parse()
                    .map(|ip| block.contains(ip))
                    .unwrap_or(false)
            })
            .collect())
    }
}

impl Default for ArpStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for ArpStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Arp
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let TargetSpec::Arp {
            interface,
            collect_type,
        } = &target.spec
        else {
            return Err(CollectError::BadTarget {
                id: target.id.clone(),
                reason: "not an arp target".into(),
            });
        };

        let mut records = Vec::with_capacity(2);
        if matches!(collect_type, ArpCollectType::Arp | ArpCollectType::Both) {
            let entries = self.neighbor_table(interface.as_deref()).await?;
            debug!(target = %target.id, entries = entries.len(), "collected neighbor table");
            records.push(TelemetryRecord::new(
                TelemetrySource::Arp,
                "arp",
                RecordData::Arp { entries },
            ));
        }
        if matches!(collect_type, ArpCollectType::Mac | ArpCollectType::Both) {
            // Switch MAC-table collection is an extension point; the
            // record shape is emitted so downstream stays uniform.
            records.push(TelemetryRecord::new(
                TelemetrySource::Arp,
                "arp",
                RecordData::Mac { entries: vec![] },
            ));
        }
        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        Ok(())
    }
}

/// Linux `ip neigh show`:
/// `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
/// With `dev IF` on the command line the `dev` pair is omitted from the
/// output, so the hint fills the interface in.
pub fn parse_ip_neigh_output(output: &str, interface_hint: Option<&str>) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| parse_ip_neigh_line(line, interface_hint))
        .collect()
}

fn parse_ip_neigh_line(line: &str, interface_hint: Option<&str>) -> Option<ArpEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    let ip = tokens[0];
    ip.parse::<std::net::Ipv4Addr>().ok()?;

    let mut interface = interface_hint.map(str::to_string);
    let mut mac = None;
    let mut iter = tokens[1..].iter();
    while let Some(token) = iter.next() {
        match *token {
            "dev" => interface = iter.next().map(|s| s.to_string()),
            "lladdr" => mac = iter.next().copied(),
            _ => {}
        }
    }
    // FAILED/INCOMPLETE entries carry no lladdr.
    let mac = normalize_mac(mac?)?;
    let state = tokens.last()?;
    let kind = if state.eq_ignore_ascii_case("permanent") {
        ArpEntryKind::Static
    } else {
        ArpEntryKind::Dynamic
    };
    Some(ArpEntry {
        ip_address: ip.to_string(),
        mac_address: mac,
        interface: interface.unwrap_or_default(),
        kind,
    })
}

/// macOS/BSD `arp -an`:
/// `? (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0 ifscope [ethernet]`
pub fn parse_arp_an_output(output: &str) -> Vec<ArpEntry> {
    output.lines().filter_map(parse_arp_an_line).collect()
}

fn parse_arp_an_line(line: &str) -> Option<ArpEntry> {
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    let ip = &line[open + 1..close];
    ip.parse::<std::net::Ipv4Addr>().ok()?;

    let tokens: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let at = tokens.iter().position(|t| *t == "at")?;
    let mac = normalize_mac(tokens.get(at + 1)?)?;
    let interface = tokens
        .iter()
        .position(|t| *t == "on")
        .and_then(|on| tokens.get(on + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();
    let kind = if tokens.iter().any(|t| *t == "permanent") {
        ArpEntryKind::Static
    } else {
        ArpEntryKind::Dynamic
    };
    Some(ArpEntry {
        ip_address: ip.to_string(),
        mac_address: mac,
        interface,
        kind,
    })
}

/// Windows `arp -a`: interface headers followed by three-column rows.
///
/// ```text
/// Interface: 192.168.1.7 --- 0x4
///   Internet Address      Physical Address      Type
///   192.168.1.1           aa-bb-cc-dd-ee-ff     dynamic
/// ```
pub fn parse_arp_a_output(output: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();
    let mut current_interface = String::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Interface:") {
            current_interface = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() != 3 {
            continue;
        }
        let Ok(ip) = tokens[0].parse::<std::net::Ipv4Addr>() else {
            continue;
        };
        let Some(mac) = normalize_mac(tokens[1]) else {
            continue;
        };
        let kind = if tokens[2].eq_ignore_ascii_case("static") {
            ArpEntryKind::Static
        } else {
            ArpEntryKind::Dynamic
        };
        entries.push(ArpEntry {
            ip_address: ip.to_string(),
            mac_address: mac,
            interface: current_interface.clone(),
            kind,
        });
    }
    entries
}
