//! Multi-source telemetry collection agent for SCADA/ICS networks.
//!
//! The agent hosts a set of source-specific collectors (SNMPv3, ARP,
//! Routing, NetFlow, Syslog, OPC-UA, Modbus) under one lifecycle, retry,
//! concurrency, and batching pipeline, and publishes normalized records
//! over TLS MQTT with a bounded local fallback when the broker is away.
//!
//! Embedders construct a [`CollectorManager`] from an [`AgentConfig`]
//! (or from parts, for tests) and bind its lifetime to the process; the
//! `otagent` binary does exactly that.

pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod manager;
pub mod net;
pub mod publisher;
pub mod record;
pub mod retry;
pub mod sources;

pub use collector::{
    Collector, CollectorEvent, CollectorStatus, EventSender, SnmpAuth, SourceStrategy, Target,
    TargetSpec,
};
pub use config::AgentConfig;
pub use manager::{
    global_manager, reset_global_manager, set_global_manager, AgentStatistics, CollectorManager,
    ManagerEvent, ManagerStatus,
};
pub use publisher::Publisher;
pub use record::{Envelope, RecordData, TelemetryRecord, TelemetrySource};
