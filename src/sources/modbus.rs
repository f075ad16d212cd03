//! Modbus adapter: same shape as the OPC-UA strategy, with a register
//! scan instead of node reads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::collector::{SourceStrategy, Target, TargetSpec};
use crate::config::ModbusRegisterConfig;
use crate::error::{CollectError, InitError};
use crate::record::{RecordData, RegisterReading, TelemetryRecord, TelemetrySource};

/// What the strategy needs from a Modbus client library.
#[async_trait]
pub trait ModbusClient: Send + Sync {
    async fn connect(&self, host: &str, port: u16, unit_id: u8) -> Result<(), CollectError>;
    async fn read_registers(
        &self,
        registers: &[ModbusRegisterConfig],
    ) -> Result<Vec<RegisterReading>, CollectError>;
}

/// Deterministic stand-in: always connects, register values derive from
/// their address.
pub struct MockModbusClient;

#[async_trait]
impl ModbusClient for MockModbusClient {
    async fn connect(&self, _host: &str, _port: u16, _unit_id: u8) -> Result<(), CollectError> {
        Ok(())
    }

    async fn read_registers(
        &self,
        registers: &[ModbusRegisterConfig],
    ) -> Result<Vec<RegisterReading>, CollectError> {
        let mut readings = Vec::new();
        for register in registers {
            for offset in 0..register.count {
                let address = register.address.wrapping_add(offset);
                readings.push(RegisterReading {
                    address,
                    kind: register.kind.clone(),
                    value: address.wrapping_mul(7).wrapping_add(13),
                });
            }
        }
        Ok(readings)
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionState {
    connected: bool,
    last_contact: Option<DateTime<Utc>>,
}

pub struct ModbusStrategy {
    client: Arc<dyn ModbusClient>,
    connections: tokio::sync::Mutex<HashMap<String, ConnectionState>>,
}

impl ModbusStrategy {
    pub fn new() -> Self {
        Self::with_client(Arc::new(MockModbusClient))
    }

    /// Plug in a real protocol client.
    pub fn with_client(client: Arc<dyn ModbusClient>) -> Self {
        ModbusStrategy {
            client,
            connections: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn connection_state(&self, target_id: &str) -> Option<(bool, Option<DateTime<Utc>>)> {
        self.connections
            .lock()
            .await
            .get(target_id)
            .map(|s| (s.connected, s.last_contact))
    }
}

impl Default for ModbusStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for ModbusStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Modbus
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let TargetSpec::Modbus {
            unit_id,
            protocol,
            registers,
        } = &target.spec
        else {
            return Err(CollectError::BadTarget {
                id: target.id.clone(),
                reason: "not a modbus target".into(),
            });
        };

        let connected = self
            .client
            .connect(&target.host, target.port.unwrap_or(502), *unit_id)
            .await
            .is_ok();
        let last_contact = {
            let mut connections = self.connections.lock().await;
            let state = connections
                .entry(target.id.clone())
                .or_insert(ConnectionState {
                    connected: false,
                    last_contact: None,
                });
            state.connected = connected;
            if connected {
                state.last_contact = Some(Utc::now());
            }
            state.last_contact
        };

        let mut records = vec![TelemetryRecord::new(
            TelemetrySource::Modbus,
            "modbus",
            RecordData::DeviceInfo {
                unit_id: *unit_id,
                protocol: protocol.clone(),
                connected,
                last_contact,
            },
        )];

        if connected && !registers.is_empty() {
            let readings = self.client.read_registers(registers).await?;
            debug!(target = %target.id, readings = readings.len(), "scanned modbus registers");
            records.push(TelemetryRecord::new(
                TelemetrySource::Modbus,
                "modbus",
                RecordData::Scan {
                    registers: readings,
                },
            ));
        }

        if let Some(device_id) = &target.device_id {
            for record in &mut records {
                record.device_id = Some(device_id.clone());
            }
        }
        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        self.connections.lock().await.clear();
        Ok(())
    }
}
