//! Agent configuration: YAML file → typed structs with serde defaults.
//!
//! Per-collector settings appear flat in the YAML (`poll_interval_ms`
//! beside `targets`), so each collector config flattens a
//! [`CollectorSettingsPatch`] and resolves it against that strategy's
//! defaults. Secrets (SNMP credentials, MQTT password) are referenced by
//! environment-variable name and resolved once at load time; the resolved
//! values never appear in logs (`Debug` is redacted).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{self, ConfigError};
use crate::record::RoutingProtocol;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub collectors: CollectorsConfig,
}

impl AgentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(error::ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        let mut config: AgentConfig =
            serde_yaml::from_str(&text).context(error::ParseFileSnafu {
                path: path.display().to_string(),
            })?;
        config.resolve_secrets()?;
        config.validate()?;
        Ok(config)
    }

    /// Pull referenced environment variables into memory.
    pub fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(mqtt) = &mut self.mqtt {
            if let Some(var) = &mqtt.password_env {
                mqtt.password = Some(Secret(read_env(var, "mqtt.password_env")?));
            }
        }
        for target in &mut self.collectors.snmp.targets {
            target.auth_password = Some(Secret(read_env(
                &target.auth_password_env,
                "snmp.targets[].auth_password_env",
            )?));
            target.priv_password = Some(Secret(read_env(
                &target.priv_password_env,
                "snmp.targets[].priv_password_env",
            )?));
        }
        Ok(())
    }

    /// Startup validation pass; all failures are fatal before any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collectors
            .snmp
            .settings()
            .validate("collectors.snmp")?;
        self.collectors.arp.settings().validate("collectors.arp")?;
        self.collectors
            .routing
            .settings()
            .validate("collectors.routing")?;
        self.collectors
            .netflow
            .settings()
            .validate("collectors.netflow")?;
        self.collectors
            .syslog
            .settings()
            .validate("collectors.syslog")?;
        self.collectors
            .opcua
            .settings()
            .validate("collectors.opcua")?;
        self.collectors
            .modbus
            .settings()
            .validate("collectors.modbus")?;

        if self.collectors.netflow.port == 0 {
            return Err(ConfigError::InvalidField {
                field: "collectors.netflow.port".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.collectors.syslog.port == 0 {
            return Err(ConfigError::InvalidField {
                field: "collectors.syslog.port".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

fn read_env(var: &str, field: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingSecret {
        var: var.to_string(),
        field: field.to_string(),
    })
}

/// A resolved secret value. Debugs as a placeholder.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(pub String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// MQTT transport settings. TLS is expected in production; the plain
/// listener is for lab brokers.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub tls: Option<MqttTlsConfig>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttTlsConfig {
    /// PEM bundle for the broker CA.
    pub ca_file: String,
    /// Optional client certificate + key (mutual TLS).
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_client_id() -> String {
    "otagent".to_string()
}

fn default_topic() -> String {
    "scada/telemetry".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

/// Per-source enablement map plus per-collector settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default)]
    pub snmp: SnmpCollectorConfig,
    #[serde(default)]
    pub arp: ArpCollectorConfig,
    #[serde(default)]
    pub routing: RoutingCollectorConfig,
    #[serde(default)]
    pub netflow: NetflowCollectorConfig,
    #[serde(default)]
    pub syslog: SyslogCollectorConfig,
    #[serde(default)]
    pub opcua: OpcuaCollectorConfig,
    #[serde(default)]
    pub modbus: ModbusCollectorConfig,
}

/// Resolved settings shared by every collector. Mutable at runtime
/// through [`CollectorSettingsPatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub retries: u32,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            enabled: true,
            poll_interval_ms: 10_000,
            timeout_ms: 5_000,
            retries: 3,
            batch_size: 100,
            max_concurrent: 5,
        }
    }
}

impl CollectorSettings {
    /// Defaults for OPC-UA collectors: servers are polled an order of
    /// magnitude slower than the generic default. Intentional.
    pub fn opcua_defaults() -> Self {
        CollectorSettings {
            poll_interval_ms: 60_000,
            ..CollectorSettings::default()
        }
    }

    /// Defaults for Modbus collectors; slower than the generic default.
    /// Intentional.
    pub fn modbus_defaults() -> Self {
        CollectorSettings {
            poll_interval_ms: 30_000,
            ..CollectorSettings::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply a partial update; `None` fields keep their current value.
    pub fn merge(&mut self, patch: &CollectorSettingsPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(v) = patch.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = patch.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = patch.retries {
            self.retries = v;
        }
        if let Some(v) = patch.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = patch.max_concurrent {
            self.max_concurrent = v;
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        let nonzero: [(&str, u64); 4] = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("timeout_ms", self.timeout_ms),
            ("batch_size", self.batch_size as u64),
            ("max_concurrent", self.max_concurrent as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::InvalidField {
                    field: format!("{section}.{name}"),
                    reason: "must be non-zero".into(),
                });
            }
        }
        Ok(())
    }
}

/// Partial settings: the serde-facing shape flattened into each
/// collector config, and the payload of runtime `update_config` calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorSettingsPatch {
    pub enabled: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
}

impl CollectorSettingsPatch {
    pub fn resolve(&self, defaults: CollectorSettings) -> CollectorSettings {
        let mut settings = defaults;
        settings.merge(self);
        settings
    }
}

fn default_true() -> bool {
    true
}

// --- SNMP ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnmpCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default)]
    pub transport: SnmpTransportKind,
    #[serde(default)]
    pub targets: Vec<SnmpTargetConfig>,
}

impl SnmpCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::default())
    }
}

/// How SNMP requests reach the wire. `Cli` shells out to net-snmp,
/// `Mock` serves deterministic fixtures (labs, tests).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpTransportKind {
    #[default]
    Cli,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpTargetConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub host: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    pub sec_name: String,
    #[serde(default = "default_auth_protocol")]
    pub auth_protocol: String,
    pub auth_password_env: String,
    #[serde(skip)]
    pub auth_password: Option<Secret>,
    #[serde(default = "default_priv_protocol")]
    pub priv_protocol: String,
    pub priv_password_env: String,
    #[serde(skip)]
    pub priv_password: Option<Secret>,
}

fn default_snmp_port() -> u16 {
    161
}

fn default_auth_protocol() -> String {
    "SHA".to_string()
}

fn default_priv_protocol() -> String {
    "AES".to_string()
}

// --- ARP ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArpCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default)]
    pub targets: Vec<ArpTargetConfig>,
}

impl ArpCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArpTargetConfig {
    #[serde(default)]
    pub id: Option<String>,
    /// Restrict `ip neigh show` to one interface.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub collect_type: ArpCollectType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ArpTargetConfig {
    fn default() -> Self {
        ArpTargetConfig {
            id: None,
            interface: None,
            collect_type: ArpCollectType::default(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArpCollectType {
    #[default]
    Arp,
    Mac,
    Both,
}

// --- Routing ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default)]
    pub targets: Vec<RoutingTargetConfig>,
}

impl RoutingCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingTargetConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub collect_routes: bool,
    #[serde(default)]
    pub collect_neighbors: bool,
    #[serde(default)]
    pub protocols: Vec<RoutingProtocol>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RoutingTargetConfig {
    fn default() -> Self {
        RoutingTargetConfig {
            id: None,
            collect_routes: true,
            collect_neighbors: false,
            protocols: Vec::new(),
            enabled: true,
        }
    }
}

// --- NetFlow ---

#[derive(Debug, Clone, Deserialize)]
pub struct NetflowCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default = "default_netflow_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Restrict accepted export versions; by default both v5 and v9 are
    /// decoded.
    #[serde(default)]
    pub version: NetflowVersion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetflowVersion {
    V5,
    V9,
    #[default]
    Both,
}

impl NetflowVersion {
    pub fn accepts(&self, version: u16) -> bool {
        match self {
            NetflowVersion::V5 => version == 5,
            NetflowVersion::V9 => version == 9,
            NetflowVersion::Both => version == 5 || version == 9,
        }
    }
}

impl NetflowCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::default())
    }
}

impl Default for NetflowCollectorConfig {
    fn default() -> Self {
        NetflowCollectorConfig {
            base: CollectorSettingsPatch::default(),
            port: default_netflow_port(),
            bind: default_bind(),
            version: NetflowVersion::default(),
        }
    }
}

fn default_netflow_port() -> u16 {
    2055
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

// --- Syslog ---

#[derive(Debug, Clone, Deserialize)]
pub struct SyslogCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default = "default_syslog_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub protocol: SyslogProtocol,
}

impl SyslogCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::default())
    }
}

impl Default for SyslogCollectorConfig {
    fn default() -> Self {
        SyslogCollectorConfig {
            base: CollectorSettingsPatch::default(),
            port: default_syslog_port(),
            bind: default_bind(),
            protocol: SyslogProtocol::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogProtocol {
    #[default]
    Udp,
    Tcp,
}

fn default_syslog_port() -> u16 {
    514
}

// --- OPC-UA ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpcuaCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default)]
    pub targets: Vec<OpcuaTargetConfig>,
}

impl OpcuaCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::opcua_defaults())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpcuaTargetConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub endpoint_url: String,
    #[serde(default = "default_security_mode")]
    pub security_mode: String,
    #[serde(default = "default_security_policy")]
    pub security_policy: String,
    #[serde(default)]
    pub monitored_nodes: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub device_id: Option<String>,
}

fn default_security_mode() -> String {
    "SignAndEncrypt".to_string()
}

fn default_security_policy() -> String {
    "Basic256Sha256".to_string()
}

// --- Modbus ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModbusCollectorConfig {
    #[serde(flatten)]
    pub base: CollectorSettingsPatch,
    #[serde(default)]
    pub targets: Vec<ModbusTargetConfig>,
}

impl ModbusCollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        self.base.resolve(CollectorSettings::modbus_defaults())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusTargetConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_modbus_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub registers: Vec<ModbusRegisterConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusRegisterConfig {
    pub address: u16,
    #[serde(default = "default_register_count")]
    pub count: u16,
    #[serde(default = "default_register_kind")]
    pub kind: String,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_modbus_protocol() -> String {
    "tcp".to_string()
}

fn default_register_count() -> u16 {
    1
}

fn default_register_kind() -> String {
    "holding".to_string()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let config: AgentConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.mqtt.is_none());
        assert_eq!(config.collectors.snmp.settings().poll_interval_ms, 10_000);
        assert_eq!(config.collectors.opcua.settings().poll_interval_ms, 60_000);
        assert_eq!(config.collectors.modbus.settings().poll_interval_ms, 30_000);
        assert_eq!(config.collectors.netflow.port, 2055);
        assert_eq!(config.collectors.syslog.port, 514);
        assert_eq!(config.collectors.syslog.protocol, SyslogProtocol::Udp);
        config.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_apply() {
        let yaml = indoc! {"
            mqtt:
              host: broker.plant.local
              topic: plant/telemetry
              tls:
                ca_file: /etc/otagent/ca.pem
            collectors:
              netflow:
                port: 9995
                poll_interval_ms: 15000
              syslog:
                protocol: tcp
                port: 1514
              opcua:
                timeout_ms: 2500
              arp:
                targets:
                  - interface: eth1
                    collect_type: both
        "};
        let config: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        let mqtt = config.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.host, "broker.plant.local");
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.topic, "plant/telemetry");
        assert!(mqtt.tls.is_some());
        assert_eq!(config.collectors.netflow.port, 9995);
        assert_eq!(config.collectors.netflow.settings().poll_interval_ms, 15_000);
        assert_eq!(config.collectors.syslog.protocol, SyslogProtocol::Tcp);
        // Overriding one field keeps the strategy default for the rest.
        let opcua = config.collectors.opcua.settings();
        assert_eq!(opcua.timeout_ms, 2_500);
        assert_eq!(opcua.poll_interval_ms, 60_000);
        assert_eq!(
            config.collectors.arp.targets[0].collect_type,
            ArpCollectType::Both
        );
        config.validate().unwrap();
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let yaml = indoc! {"
            collectors:
              arp:
                poll_interval_ms: 0
        "};
        let config: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("collectors.arp.poll_interval_ms"));
    }

    #[test]
    fn zero_batch_and_concurrency_are_rejected() {
        for field in ["batch_size", "max_concurrent"] {
            let yaml = format!("collectors:\n  syslog:\n    {field}: 0\n");
            let config: AgentConfig = serde_yaml::from_str(&yaml).unwrap();
            assert!(config.validate().is_err(), "{field} = 0 should fail");
        }
    }

    #[test]
    fn settings_patch_merges_partially() {
        let mut settings = CollectorSettings::default();
        settings.merge(&CollectorSettingsPatch {
            poll_interval_ms: Some(1_000),
            retries: Some(7),
            ..Default::default()
        });
        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.retries, 7);
        // Untouched fields keep their values.
        assert_eq!(settings.timeout_ms, 5_000);
        assert_eq!(settings.batch_size, 100);
        assert!(settings.enabled);
    }

    #[test]
    fn snmp_secrets_come_from_the_environment() {
        let yaml = indoc! {"
            collectors:
              snmp:
                targets:
                  - host: 10.0.0.1
                    sec_name: ro
                    auth_password_env: OTAGENT_TEST_AUTH
                    priv_password_env: OTAGENT_TEST_PRIV
        "};
        let mut config: AgentConfig = serde_yaml::from_str(yaml).unwrap();

        // Unset variables are a startup error.
        std::env::remove_var("OTAGENT_TEST_AUTH");
        std::env::remove_var("OTAGENT_TEST_PRIV");
        assert!(config.resolve_secrets().is_err());

        std::env::set_var("OTAGENT_TEST_AUTH", "authpass");
        std::env::set_var("OTAGENT_TEST_PRIV", "privpass");
        config.resolve_secrets().unwrap();
        let target = &config.collectors.snmp.targets[0];
        assert_eq!(target.auth_password.as_ref().unwrap().expose(), "authpass");
        assert_eq!(target.priv_password.as_ref().unwrap().expose(), "privpass");

        // Redacted debug output.
        let debug = format!("{target:?}");
        assert!(!debug.contains("authpass"));
        assert!(!debug.contains("privpass"));
    }
}
