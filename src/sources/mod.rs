//! Source strategies and their construction from the agent config.

pub mod arp;
mod exec;
pub mod modbus;
pub mod netflow;
pub mod opcua;
pub mod routing;
pub mod snmp;
pub mod syslog;

use std::sync::Arc;

use tracing::warn;

use crate::collector::{Collector, EventSender, SnmpAuth, Target, TargetSpec};
use crate::config::{
    ArpTargetConfig, CollectorsConfig, ModbusTargetConfig, OpcuaTargetConfig, RoutingTargetConfig,
    SnmpTargetConfig,
};
use crate::publisher::Publisher;
use crate::record::TelemetrySource;

/// Instantiate every collector whose source is enabled, targets included.
pub fn build_collectors(
    config: &CollectorsConfig,
    publisher: &Arc<Publisher>,
) -> Vec<Arc<Collector>> {
    let mut collectors = Vec::new();
    let weak = || Arc::downgrade(publisher);

    let snmp_settings = config.snmp.settings();
    if snmp_settings.enabled {
        let strategy = Arc::new(snmp::SnmpStrategy::new(
            config.snmp.transport,
            snmp_settings.timeout_ms,
        ));
        let collector = Collector::new(
            "snmp",
            TelemetrySource::Snmp,
            strategy,
            snmp_settings,
            weak(),
        );
        for target in &config.snmp.targets {
            match snmp_target(target) {
                Some(target) => {
                    collector.add_target(target);
                }
                None => warn!(
                    host = %target.host,
                    "skipping snmp target with unresolved credentials"
                ),
            }
        }
        collectors.push(Arc::new(collector));
    }

    let arp_settings = config.arp.settings();
    if arp_settings.enabled {
        let collector = Collector::new(
            "arp",
            TelemetrySource::Arp,
            Arc::new(arp::ArpStrategy::new()),
            arp_settings,
            weak(),
        );
        if config.arp.targets.is_empty() {
            collector.add_target(arp_target(&ArpTargetConfig::default()));
        }
        for target in &config.arp.targets {
            collector.add_target(arp_target(target));
        }
        collectors.push(Arc::new(collector));
    }

    let routing_settings = config.routing.settings();
    if routing_settings.enabled {
        let collector = Collector::new(
            "routing",
            TelemetrySource::Routing,
            Arc::new(routing::RoutingStrategy::new()),
            routing_settings,
            weak(),
        );
        if config.routing.targets.is_empty() {
            collector.add_target(routing_target(&RoutingTargetConfig::default()));
        }
        for target in &config.routing.targets {
            collector.add_target(routing_target(target));
        }
        collectors.push(Arc::new(collector));
    }

    let netflow_settings = config.netflow.settings();
    if netflow_settings.enabled {
        let strategy = Arc::new(netflow::NetflowStrategy::new(&config.netflow));
        let collector = Collector::new(
            "netflow",
            TelemetrySource::Netflow,
            strategy,
            netflow_settings,
            weak(),
        );
        collector.add_target(listener_target(&config.netflow.bind));
        collectors.push(Arc::new(collector));
    }

    let syslog_settings = config.syslog.settings();
    if syslog_settings.enabled {
        // The strategy shares the collector's event channel so security
        // events surface without waiting for the drain tick.
        let events = EventSender::new();
        let strategy = Arc::new(syslog::SyslogStrategy::new(&config.syslog, events.clone()));
        let collector = Collector::with_events(
            "syslog",
            TelemetrySource::Syslog,
            strategy,
            syslog_settings,
            weak(),
            events,
        );
        collector.add_target(listener_target(&config.syslog.bind));
        collectors.push(Arc::new(collector));
    }

    let opcua_settings = config.opcua.settings();
    if opcua_settings.enabled {
        let collector = Collector::new(
            "opcua",
            TelemetrySource::Opcua,
            Arc::new(opcua::OpcuaStrategy::new()),
            opcua_settings,
            weak(),
        );
        for target in &config.opcua.targets {
            collector.add_target(opcua_target(target));
        }
        collectors.push(Arc::new(collector));
    }

    let modbus_settings = config.modbus.settings();
    if modbus_settings.enabled {
        let collector = Collector::new(
            "modbus",
            TelemetrySource::Modbus,
            Arc::new(modbus::ModbusStrategy::new()),
            modbus_settings,
            weak(),
        );
        for target in &config.modbus.targets {
            collector.add_target(modbus_target(target));
        }
        collectors.push(Arc::new(collector));
    }

    collectors
}

fn snmp_target(config: &SnmpTargetConfig) -> Option<Target> {
    let auth = SnmpAuth {
        sec_name: config.sec_name.clone(),
        auth_protocol: config.auth_protocol.clone(),
        auth_password: config.auth_password.clone()?,
        priv_protocol: config.priv_protocol.clone(),
        priv_password: config.priv_password.clone()?,
    };
    let id = config
        .id
        .clone()
        .unwrap_or_else(|| format!("snmp-{}:{}", config.host, config.port));
    let mut target = Target::new(&config.host, TargetSpec::Snmp(auth))
        .with_id(id)
        .with_port(config.port);
    target.enabled = config.enabled;
    target.device_id = config.device_id.clone();
    Some(target)
}

fn arp_target(config: &ArpTargetConfig) -> Target {
    let id = config.id.clone().unwrap_or_else(|| {
        format!(
            "arp-{}",
            config.interface.as_deref().unwrap_or("all")
        )
    });
    let mut target = Target::new(
        "localhost",
        TargetSpec::Arp {
            interface: config.interface.clone(),
            collect_type: config.collect_type,
        },
    )
    .with_id(id);
    target.enabled = config.enabled;
    target
}

fn routing_target(config: &RoutingTargetConfig) -> Target {
    let id = config.id.clone().unwrap_or_else(|| "routing-local".to_string());
    let mut target = Target::new(
        "localhost",
        TargetSpec::Routing {
            collect_routes: config.collect_routes,
            collect_neighbors: config.collect_neighbors,
            protocols: config.protocols.clone(),
        },
    )
    .with_id(id);
    target.enabled = config.enabled;
    target
}

fn listener_target(bind: &str) -> Target {
    Target::new(bind, TargetSpec::Listener).with_id("listener")
}

fn opcua_target(config: &OpcuaTargetConfig) -> Target {
    let id = config
        .id
        .clone()
        .unwrap_or_else(|| config.endpoint_url.clone());
    let mut target = Target::new(
        &config.endpoint_url,
        TargetSpec::OpcUa {
            endpoint_url: config.endpoint_url.clone(),
            security_mode: config.security_mode.clone(),
            security_policy: config.security_policy.clone(),
            monitored_nodes: config.monitored_nodes.clone(),
        },
    )
    .with_id(id);
    target.enabled = config.enabled;
    target.device_id = config.device_id.clone();
    target
}

fn modbus_target(config: &ModbusTargetConfig) -> Target {
    let id = config
        .id
        .clone()
        .unwrap_or_else(|| format!("modbus-{}:{}", config.host, config.port));
    let mut target = Target::new(
        &config.host,
        TargetSpec::Modbus {
            unit_id: config.unit_id,
            protocol: config.protocol.clone(),
            registers: config.registers.clone(),
        },
    )
    .with_id(id)
    .with_port(config.port);
    target.enabled = config.enabled;
    target.device_id = config.device_id.clone();
    target
}
