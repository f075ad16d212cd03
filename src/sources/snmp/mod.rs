//! SNMPv3 collection: per-target sessions, four table reads per cycle,
//! varbind regrouping into typed records.
//!
//! Only authPriv is spoken; v1/v2c targets are not supported.

mod oids;
mod session;

pub use session::{
    parse_varbind_line, MockSnmpSession, NetSnmpCliSession, Oid, SnmpSession, SnmpValue, VarBind,
};

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::collector::{SourceStrategy, Target, TargetSpec};
use crate::config::SnmpTransportKind;
use crate::error::{CollectError, InitError};
use crate::record::{
    ArpEntry, ArpEntryKind, InterfaceInfo, LldpNeighbor, RecordData, TelemetryRecord,
    TelemetrySource,
};

type SessionFactory = Box<dyn Fn(&Target) -> Arc<dyn SnmpSession> + Send + Sync>;

pub struct SnmpStrategy {
    transport: SnmpTransportKind,
    timeout_ms: u64,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<dyn SnmpSession>>>,
    factory: Option<SessionFactory>,
}

impl SnmpStrategy {
    pub fn new(transport: SnmpTransportKind, timeout_ms: u64) -> Self {
        SnmpStrategy {
            transport,
            timeout_ms,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            factory: None,
        }
    }

    /// Inject a session constructor; tests use this to mock the wire.
    pub fn with_session_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Target) -> Arc<dyn SnmpSession> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Sessions are created on first use and live until cleanup.
    async fn session_for(&self, target: &Target) -> Result<Arc<dyn SnmpSession>, CollectError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&target.id) {
            return Ok(Arc::clone(session));
        }
        let session: Arc<dyn SnmpSession> = if let Some(factory) = &self.factory {
            factory(target)
        } else {
            match self.transport {
                SnmpTransportKind::Mock => Arc::new(MockSnmpSession::fixture(&target.host)),
                SnmpTransportKind::Cli => {
                    let TargetSpec::Snmp(auth) = &target.spec else {
                        return Err(CollectError::BadTarget {
                            id: target.id.clone(),
                            reason: "not an snmp target".into(),
                        });
                    };
                    Arc::new(NetSnmpCliSession::new(
                        &target.host,
                        target.port.unwrap_or(161),
                        auth.clone(),
                        self.timeout_ms,
                    ))
                }
            }
        };
        sessions.insert(target.id.clone(), Arc::clone(&session));
        Ok(session)
    }
}

fn system_oids() -> Vec<Oid> {
    [
        oids::SYS_DESCR,
        oids::SYS_OBJECT_ID,
        oids::SYS_UPTIME,
        oids::SYS_CONTACT,
        oids::SYS_NAME,
        oids::SYS_LOCATION,
    ]
    .iter()
    .filter_map(|s| Oid::parse(s))
    .collect()
}

fn find_value<'a>(binds: &'a [VarBind], oid: &str) -> Option<&'a SnmpValue> {
    let oid = Oid::parse(oid)?;
    binds.iter().find(|b| b.oid == oid).map(|b| &b.value)
}

fn build_system_record(binds: &[VarBind]) -> Option<RecordData> {
    if binds.is_empty() {
        return None;
    }
    Some(RecordData::System {
        sys_name: find_value(binds, oids::SYS_NAME)
            .and_then(SnmpValue::as_text)
            .unwrap_or_default(),
        sys_descr: find_value(binds, oids::SYS_DESCR)
            .and_then(SnmpValue::as_text)
            .unwrap_or_default(),
        sys_object_id: find_value(binds, oids::SYS_OBJECT_ID).and_then(SnmpValue::as_text),
        sys_up_time: find_value(binds, oids::SYS_UPTIME).and_then(SnmpValue::as_u64),
        sys_contact: find_value(binds, oids::SYS_CONTACT).and_then(SnmpValue::as_text),
        sys_location: find_value(binds, oids::SYS_LOCATION).and_then(SnmpValue::as_text),
    })
}

/// Regroup an ifTable walk into per-interface tuples. Walk varbinds are
/// column-major (`<entry>.<column>.<index>`); rows are rebuilt by
/// grouping on the trailing index segment.
fn group_interfaces(binds: &[VarBind]) -> Vec<InterfaceInfo> {
    let base = match Oid::parse(oids::IF_TABLE_ENTRY) {
        Some(base) => base,
        None => return Vec::new(),
    };
    let mut rows: BTreeMap<u32, BTreeMap<u32, &SnmpValue>> = BTreeMap::new();
    for bind in binds {
        let Some(suffix) = bind.oid.suffix(&base) else {
            continue;
        };
        let (Some(&column), Some(&index)) = (suffix.first(), suffix.last()) else {
            continue;
        };
        if suffix.len() < 2 {
            continue;
        }
        rows.entry(index).or_default().insert(column, &bind.value);
    }

    rows.into_iter()
        .map(|(index, columns)| InterfaceInfo {
            index,
            descr: columns
                .get(&oids::IF_DESCR_COL)
                .and_then(|v| v.as_text())
                .unwrap_or_default(),
            if_type: columns.get(&oids::IF_TYPE_COL).and_then(|v| v.as_u32()),
            speed: columns.get(&oids::IF_SPEED_COL).and_then(|v| v.as_u64()),
            phys_address: columns
                .get(&oids::IF_PHYS_ADDRESS_COL)
                .and_then(|v| v.as_mac()),
            admin_status: columns
                .get(&oids::IF_ADMIN_STATUS_COL)
                .and_then(|v| v.as_u32()),
            oper_status: columns
                .get(&oids::IF_OPER_STATUS_COL)
                .and_then(|v| v.as_u32()),
        })
        .collect()
}

/// Regroup an LLDP remote-table walk. Rows are keyed by the trailing
/// remote index; the local port is the second-to-last index segment.
fn group_lldp_neighbors(binds: &[VarBind]) -> Vec<LldpNeighbor> {
    let base = match Oid::parse(oids::LLDP_REM_ENTRY) {
        Some(base) => base,
        None => return Vec::new(),
    };
    let mut rows: BTreeMap<u32, (u32, BTreeMap<u32, &SnmpValue>)> = BTreeMap::new();
    for bind in binds {
        let Some(suffix) = bind.oid.suffix(&base) else {
            continue;
        };
        if suffix.len() < 3 {
            continue;
        }
        let column = suffix[0];
        let index = suffix[suffix.len() - 1];
        let local_port = suffix[suffix.len() - 2];
        let row = rows.entry(index).or_insert_with(|| (local_port, BTreeMap::new()));
        row.1.insert(column, &bind.value);
    }

    rows.into_iter()
        .map(|(_, (local_port, columns))| LldpNeighbor {
            local_port,
            chassis_id: columns
                .get(&oids::LLDP_REM_CHASSIS_ID_COL)
                .and_then(|v| v.as_mac().or_else(|| v.as_text())),
            port_id: columns
                .get(&oids::LLDP_REM_PORT_ID_COL)
                .and_then(|v| v.as_text()),
            system_name: columns
                .get(&oids::LLDP_REM_SYS_NAME_COL)
                .and_then(|v| v.as_text()),
        })
        .collect()
}

/// Regroup an ipNetToMedia walk into ARP entries. The suffix after the
/// column is `ifIndex.a.b.c.d`.
fn group_arp_entries(binds: &[VarBind]) -> Vec<ArpEntry> {
    let base = match Oid::parse(oids::IP_NET_TO_MEDIA_ENTRY) {
        Some(base) => base,
        None => return Vec::new(),
    };
    let mut rows: BTreeMap<(u32, String), BTreeMap<u32, &SnmpValue>> = BTreeMap::new();
    for bind in binds {
        let Some(suffix) = bind.oid.suffix(&base) else {
            continue;
        };
        if suffix.len() != 6 {
            continue;
        }
        let column = suffix[0];
        let if_index = suffix[1];
        let ip = format!("{}.{}.{}.{}", suffix[2], suffix[3], suffix[4], suffix[5]);
        rows.entry((if_index, ip)).or_default().insert(column, &bind.value);
    }

    rows.into_iter()
        .filter_map(|((if_index, ip), columns)| {
            let mac = columns.get(&oids::IP_NET_TO_MEDIA_PHYS_COL)?.as_mac()?;
            let kind = match columns
                .get(&oids::IP_NET_TO_MEDIA_TYPE_COL)
                .and_then(|v| v.as_u64())
            {
                Some(oids::MEDIA_TYPE_STATIC) => ArpEntryKind::Static,
                Some(oids::MEDIA_TYPE_DYNAMIC) => ArpEntryKind::Dynamic,
                // other(1)/invalid(2) rows and absent columns read as
                // dynamic.
                _ => ArpEntryKind::Dynamic,
            };
            Some(ArpEntry {
                ip_address: ip,
                mac_address: mac,
                interface: if_index.to_string(),
                kind,
            })
        })
        .collect()
}

#[async_trait]
impl SourceStrategy for SnmpStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Snmp
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let session = self.session_for(target).await?;
        let mut records = Vec::with_capacity(4);

        let with_device = |mut record: TelemetryRecord, target: &Target| {
            if let Some(device_id) = &target.device_id {
                record.device_id = Some(device_id.clone());
            }
            record
        };

        let system_binds = session.get(&system_oids()).await?;
        if let Some(data) = build_system_record(&system_binds) {
            records.push(with_device(
                TelemetryRecord::new(TelemetrySource::Snmp, "snmp", data),
                target,
            ));
        }

        let if_base = Oid::parse(oids::IF_TABLE_ENTRY).expect("constant oid");
        let interfaces = group_interfaces(&session.walk(&if_base).await?);
        if !interfaces.is_empty() {
            records.push(with_device(
                TelemetryRecord::new(
                    TelemetrySource::Snmp,
                    "snmp",
                    RecordData::Interfaces { interfaces },
                ),
                target,
            ));
        }

        let lldp_base = Oid::parse(oids::LLDP_REM_ENTRY).expect("constant oid");
        let neighbors = group_lldp_neighbors(&session.walk(&lldp_base).await?);
        if !neighbors.is_empty() {
            records.push(with_device(
                TelemetryRecord::new(
                    TelemetrySource::Snmp,
                    "snmp",
                    RecordData::Neighbors { neighbors },
                ),
                target,
            ));
        }

        let arp_base = Oid::parse(oids::IP_NET_TO_MEDIA_ENTRY).expect("constant oid");
        let entries = group_arp_entries(&session.walk(&arp_base).await?);
        if !entries.is_empty() {
            records.push(with_device(
                TelemetryRecord::new(TelemetrySource::Snmp, "snmp", RecordData::Arp { entries }),
                target,
            ));
        }

        debug!(target = %target.id, records = records.len(), "snmp collection finished");
        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        let mut sessions = self.sessions.lock().await;
        let closed = sessions.len();
        sessions.clear();
        if closed > 0 {
            debug!(closed, "closed snmp sessions");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SnmpAuth;
    use crate::config::Secret;

    fn snmp_target(host: &str) -> Target {
        Target::new(
            host,
            TargetSpec::Snmp(SnmpAuth {
                sec_name: "ro".into(),
                auth_protocol: "SHA".into(),
                auth_password: Secret("authpass".into()),
                priv_protocol: "AES".into(),
                priv_password: Secret("privpass".into()),
            }),
        )
        .with_id(format!("snmp-{host}"))
        .with_port(161)
    }

    fn varbind(oid: &str, value: SnmpValue) -> VarBind {
        VarBind {
            oid: Oid::parse(oid).unwrap(),
            value,
        }
    }

    #[tokio::test]
    async fn minimal_system_get_yields_one_record() {
        let strategy = SnmpStrategy::new(SnmpTransportKind::Mock, 5_000)
            .with_session_factory(|_target| {
                Arc::new(
                    MockSnmpSession::new()
                        .with_value(
                            oids::SYS_NAME,
                            SnmpValue::OctetString(b"PLC-01".to_vec()),
                        )
                        .with_value(
                            oids::SYS_DESCR,
                            SnmpValue::OctetString(b"S7-1500".to_vec()),
                        )
                        .with_value(oids::SYS_UPTIME, SnmpValue::TimeTicks(123_456)),
                )
            });

        let target = snmp_target("10.0.0.1");
        let records = strategy.collect(&target).await.unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].data {
            RecordData::System {
                sys_name,
                sys_descr,
                sys_up_time,
                ..
            } => {
                assert_eq!(sys_name, "PLC-01");
                assert_eq!(sys_descr, "S7-1500");
                assert_eq!(*sys_up_time, Some(123_456));
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert_eq!(records[0].data.type_tag(), "system");
    }

    #[tokio::test]
    async fn interface_rows_regroup_from_column_major_walk() {
        let walk = vec![
            varbind(".1.3.6.1.2.1.2.2.1.2.1", SnmpValue::OctetString(b"eth0".to_vec())),
            varbind(".1.3.6.1.2.1.2.2.1.2.2", SnmpValue::OctetString(b"eth1".to_vec())),
            varbind(".1.3.6.1.2.1.2.2.1.3.1", SnmpValue::Integer(6)),
            varbind(".1.3.6.1.2.1.2.2.1.5.1", SnmpValue::Gauge(1_000_000_000)),
            varbind(
                ".1.3.6.1.2.1.2.2.1.6.1",
                SnmpValue::OctetString(vec![0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]),
            ),
            varbind(".1.3.6.1.2.1.2.2.1.7.1", SnmpValue::Integer(1)),
            varbind(".1.3.6.1.2.1.2.2.1.8.2", SnmpValue::Integer(2)),
        ];
        let interfaces = group_interfaces(&walk);
        assert_eq!(interfaces.len(), 2);

        let eth0 = &interfaces[0];
        assert_eq!(eth0.index, 1);
        assert_eq!(eth0.descr, "eth0");
        assert_eq!(eth0.if_type, Some(6));
        assert_eq!(eth0.speed, Some(1_000_000_000));
        assert_eq!(eth0.phys_address.as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(eth0.admin_status, Some(1));

        let eth1 = &interfaces[1];
        assert_eq!(eth1.index, 2);
        assert_eq!(eth1.descr, "eth1");
        assert_eq!(eth1.oper_status, Some(2));
    }

    #[tokio::test]
    async fn lldp_rows_group_on_trailing_index() {
        let walk = vec![
            varbind(
                ".1.0.8802.1.1.2.1.4.1.1.5.0.3.1",
                SnmpValue::OctetString(vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            ),
            varbind(
                ".1.0.8802.1.1.2.1.4.1.1.7.0.3.1",
                SnmpValue::OctetString(b"Gi1/0/3".to_vec()),
            ),
            varbind(
                ".1.0.8802.1.1.2.1.4.1.1.9.0.3.1",
                SnmpValue::OctetString(b"core-sw".to_vec()),
            ),
        ];
        let neighbors = group_lldp_neighbors(&walk);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].local_port, 3);
        assert_eq!(neighbors[0].chassis_id.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(neighbors[0].port_id.as_deref(), Some("Gi1/0/3"));
        assert_eq!(neighbors[0].system_name.as_deref(), Some("core-sw"));
    }

    #[tokio::test]
    async fn arp_rows_parse_ip_from_oid_suffix() {
        let walk = vec![
            varbind(
                ".1.3.6.1.2.1.4.22.1.2.4.10.0.0.1",
                SnmpValue::OctetString(vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            ),
            varbind(".1.3.6.1.2.1.4.22.1.4.4.10.0.0.1", SnmpValue::Integer(4)),
            varbind(
                ".1.3.6.1.2.1.4.22.1.2.4.10.0.0.2",
                SnmpValue::OctetString(vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            ),
            varbind(".1.3.6.1.2.1.4.22.1.4.4.10.0.0.2", SnmpValue::Integer(3)),
        ];
        let entries = group_arp_entries(&walk);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip_address, "10.0.0.1");
        assert_eq!(entries[0].mac_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entries[0].interface, "4");
        assert_eq!(entries[0].kind, ArpEntryKind::Static);
        assert_eq!(entries[1].kind, ArpEntryKind::Dynamic);
    }

    #[tokio::test]
    async fn empty_neighbor_and_arp_walks_produce_no_records() {
        let strategy = SnmpStrategy::new(SnmpTransportKind::Mock, 5_000);
        let target = snmp_target("192.168.7.7");
        let records = strategy.collect(&target).await.unwrap();

        // The fixture has system + one interface, empty LLDP/ARP tables.
        let tags: Vec<&str> = records.iter().map(|r| r.data.type_tag()).collect();
        assert_eq!(tags, vec!["system", "interfaces"]);
    }

    #[tokio::test]
    async fn sessions_are_reused_per_target_and_closed_on_cleanup() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let strategy = SnmpStrategy::new(SnmpTransportKind::Mock, 5_000)
            .with_session_factory(move |target| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(MockSnmpSession::fixture(&target.host))
            });

        let target = snmp_target("10.0.0.1");
        strategy.collect(&target).await.unwrap();
        strategy.collect(&target).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);

        strategy.cleanup().await.unwrap();
        strategy.collect(&target).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn device_id_propagates_to_records() {
        let strategy = SnmpStrategy::new(SnmpTransportKind::Mock, 5_000);
        let target = snmp_target("10.0.0.1").with_device_id("plc-area-1");
        let records = strategy.collect(&target).await.unwrap();
        assert!(records
            .iter()
            .all(|r| r.device_id.as_deref() == Some("plc-area-1")));
    }
}
