//! OPC-UA adapter: the client is a seam, the bundled implementation is a
//! deterministic mock so the pipeline downstream of the strategy is
//! exercised identically with or without a protocol stack.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::collector::{SourceStrategy, Target, TargetSpec};
use crate::error::{CollectError, InitError};
use crate::record::{NodeValue, RecordData, TelemetryRecord, TelemetrySource};

/// What the strategy needs from an OPC-UA client library.
#[async_trait]
pub trait OpcUaClient: Send + Sync {
    async fn connect(&self, endpoint_url: &str) -> Result<(), CollectError>;
    async fn read_nodes(&self, node_ids: &[String]) -> Result<Vec<NodeValue>, CollectError>;
}

/// Deterministic stand-in: always connects, serves stable values keyed
/// on the node id.
pub struct MockOpcUaClient;

#[async_trait]
impl OpcUaClient for MockOpcUaClient {
    async fn connect(&self, _endpoint_url: &str) -> Result<(), CollectError> {
        Ok(())
    }

    async fn read_nodes(&self, node_ids: &[String]) -> Result<Vec<NodeValue>, CollectError> {
        Ok(node_ids
            .iter()
            .map(|node_id| NodeValue {
                node_id: node_id.clone(),
                display_name: node_id.rsplit(['.', '=']).next().unwrap_or(node_id).to_string(),
                value: serde_json::Value::from(mock_value_for(node_id)),
                status: "Good".to_string(),
                timestamp: Utc::now(),
            })
            .collect())
    }
}

/// Stable pseudo-reading derived from the node id.
fn mock_value_for(node_id: &str) -> u32 {
    node_id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
        % 10_000
}

#[derive(Debug, Clone, Copy)]
struct ConnectionState {
    connected: bool,
    last_contact: Option<DateTime<Utc>>,
}

pub struct OpcuaStrategy {
    client: Arc<dyn OpcUaClient>,
    connections: tokio::sync::Mutex<HashMap<String, ConnectionState>>,
}

impl OpcuaStrategy {
    pub fn new() -> Self {
        Self::with_client(Arc::new(MockOpcUaClient))
    }

    /// Plug in a real protocol client.
    pub fn with_client(client: Arc<dyn OpcUaClient>) -> Self {
        OpcuaStrategy {
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

impl Default for OpcuaStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for OpcuaStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Opcua
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let TargetSpec::OpcUa {
            endpoint_url,
            security_mode,
            security_policy,
            monitored_nodes,
        } = &target.spec
        else {
            return Err(CollectError::BadTarget {
                id: target.id.clone(),
                reason: "not an opc-ua target".into(),
            });
        };

        let connect_result = self.client.connect(endpoint_url).await;
        let connected = connect_result.is_ok();
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
            TelemetrySource::Opcua,
            "opcua",
            RecordData::ServerInfo {
                endpoint_url: endpoint_url.clone(),
                connected,
                security_mode: security_mode.clone(),
                security_policy: security_policy.clone(),
                last_contact,
            },
        )];

        if connected && !monitored_nodes.is_empty() {
            let values = self.client.read_nodes(monitored_nodes).await?;
            debug!(target = %target.id, values = values.len(), "read opc-ua nodes");
            records.push(TelemetryRecord::new(
                TelemetrySource::Opcua,
                "opcua",
                RecordData::Values { values },
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
