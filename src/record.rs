//! Normalized telemetry records and the MQTT envelope.
//!
//! Every strategy produces [`TelemetryRecord`]s whose payload is a
//! [`RecordData`] variant tagged on the wire by a `type` discriminator,
//! so the upstream processor can dispatch without knowing the producing
//! collector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The subsystem that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    Snmp,
    Arp,
    Netflow,
    Syslog,
    Routing,
    Opcua,
    Modbus,
}

impl TelemetrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetrySource::Snmp => "snmp",
            TelemetrySource::Arp => "arp",
            TelemetrySource::Netflow => "netflow",
            TelemetrySource::Syslog => "syslog",
            TelemetrySource::Routing => "routing",
            TelemetrySource::Opcua => "opcua",
            TelemetrySource::Modbus => "modbus",
        }
    }
}

impl std::fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized telemetry record, owned by its collector until
/// handed to the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: String,
    pub source: TelemetrySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: RecordData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub processed: bool,
    pub metadata: RecordMetadata,
}

impl TelemetryRecord {
    pub fn new(source: TelemetrySource, collector: &str, data: RecordData) -> Self {
        TelemetryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            device_id: None,
            timestamp: Utc::now(),
            data,
            raw: None,
            processed: false,
            metadata: RecordMetadata {
                collector: collector.to_string(),
            },
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub collector: String,
}

/// Record payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordData {
    /// SNMP system group.
    System {
        sys_name: String,
        sys_descr: String,
        sys_object_id: Option<String>,
        sys_up_time: Option<u64>,
        sys_contact: Option<String>,
        sys_location: Option<String>,
    },
    /// SNMP ifTable rows.
    Interfaces { interfaces: Vec<InterfaceInfo> },
    /// LLDP remote table rows.
    Neighbors { neighbors: Vec<LldpNeighbor> },
    /// Neighbor/ARP table entries (SNMP ipNetToMedia or OS neighbor table).
    Arp { entries: Vec<ArpEntry> },
    /// Switch MAC forwarding table entries.
    Mac { entries: Vec<MacTableEntry> },
    /// OS routing table.
    Routes { routes: Vec<RouteEntry> },
    /// Dynamic-routing protocol neighbors (OSPF/BGP via vtysh).
    RoutingNeighbors {
        protocol: RoutingProtocol,
        neighbors: Vec<RoutingNeighbor>,
    },
    /// Aggregated NetFlow flows from one drain tick.
    Netflow { flows: Vec<FlowRecord> },
    /// Security-relevant syslog traffic from one drain tick.
    Syslog {
        security_event_count: u64,
        severity_distribution: BTreeMap<u8, u64>,
        messages: Vec<SyslogMessage>,
    },
    /// Volume summary of all syslog traffic from one drain tick.
    SyslogSummary {
        total_count: u64,
        time_range: TimeRange,
        severity_distribution: BTreeMap<u8, u64>,
        top_hosts: Vec<HostCount>,
    },
    /// OPC-UA server state for one target.
    ServerInfo {
        endpoint_url: String,
        connected: bool,
        security_mode: String,
        security_policy: String,
        last_contact: Option<DateTime<Utc>>,
    },
    /// OPC-UA monitored node values.
    Values { values: Vec<NodeValue> },
    /// Modbus device state for one target.
    DeviceInfo {
        unit_id: u8,
        protocol: String,
        connected: bool,
        last_contact: Option<DateTime<Utc>>,
    },
    /// Modbus register scan results.
    Scan { registers: Vec<RegisterReading> },
}

impl RecordData {
    /// The wire value of the `type` discriminator.
    pub fn type_tag(&self) -> &'static str {
        match self {
            RecordData::System { .. } => "system",
            RecordData::Interfaces { .. } => "interfaces",
            RecordData::Neighbors { .. } => "neighbors",
            RecordData::Arp { .. } => "arp",
            RecordData::Mac { .. } => "mac",
            RecordData::Routes { .. } => "routes",
            RecordData::RoutingNeighbors { .. } => "routing_neighbors",
            RecordData::Netflow { .. } => "netflow",
            RecordData::Syslog { .. } => "syslog",
            RecordData::SyslogSummary { .. } => "syslog_summary",
            RecordData::ServerInfo { .. } => "server_info",
            RecordData::Values { .. } => "values",
            RecordData::DeviceInfo { .. } => "device_info",
            RecordData::Scan { .. } => "scan",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub index: u32,
    pub descr: String,
    pub if_type: Option<u32>,
    pub speed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phys_address: Option<String>,
    pub admin_status: Option<u32>,
    pub oper_status: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub local_port: u32,
    pub chassis_id: Option<String>,
    pub port_id: Option<String>,
    pub system_name: Option<String>,
}

/// One neighbor-table entry. `mac_address` is always canonical
/// lower-hex colon-separated form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip_address: String,
    pub mac_address: String,
    pub interface: String,
    #[serde(rename = "type")]
    pub kind: ArpEntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArpEntryKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacTableEntry {
    pub mac_address: String,
    pub port: Option<String>,
    pub vlan: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: String,
    pub netmask: String,
    pub gateway: String,
    pub interface: String,
    pub metric: u32,
    pub protocol: RouteProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteProtocol {
    Connected,
    Static,
    Ospf,
    Bgp,
    Rip,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProtocol {
    Ospf,
    Bgp,
    Rip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingNeighbor {
    pub address: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_as: Option<u32>,
}

/// One aggregated flow. Times are unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_address: String,
    pub dst_address: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub bytes: u64,
    pub packets: u64,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslogMessage {
    pub facility: u8,
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<BTreeMap<String, BTreeMap<String, String>>>,
    pub message: String,
    pub source_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCount {
    pub hostname: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeValue {
    pub node_id: String,
    pub display_name: String,
    pub value: serde_json::Value,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReading {
    pub address: u16,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u16,
}

/// The batch envelope published to MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub collector: String,
    pub source: TelemetrySource,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub data: Vec<TelemetryRecord>,
}

impl Envelope {
    pub fn new(collector: &str, source: TelemetrySource, data: Vec<TelemetryRecord>) -> Self {
        Envelope {
            collector: collector.to_string(),
            source,
            timestamp: Utc::now(),
            count: data.len(),
            data,
        }
    }
}
