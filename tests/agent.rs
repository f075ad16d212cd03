//! Whole-agent scenarios: config-driven construction, the publish
//! pipeline with a disconnected broker, and shutdown quiescence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indoc::indoc;

use otagent::collector::{CollectorEvent, SourceStrategy, Target, TargetSpec};
use otagent::config::CollectorSettings;
use otagent::error::{CollectError, InitError};
use otagent::record::RecordData;
use otagent::{
    AgentConfig, Collector, CollectorManager, ManagerEvent, Publisher, TelemetryRecord,
    TelemetrySource,
};

fn mock_agent_config() -> AgentConfig {
    // Listener-based and CLI-scraping collectors stay off so the test
    // exercises only deterministic strategies.
    let yaml = indoc! {"
        collectors:
          snmp:
            transport: mock
            poll_interval_ms: 50
            targets:
              - host: 10.0.0.1
                sec_name: ro
                auth_password_env: OTAGENT_E2E_AUTH
                priv_password_env: OTAGENT_E2E_PRIV
          arp:
            enabled: false
          routing:
            enabled: false
          netflow:
            enabled: false
          syslog:
            enabled: false
          opcua:
            poll_interval_ms: 50
            targets:
              - endpoint_url: opc.tcp://plc1:4840
                monitored_nodes: [\"ns=2;s=Line1.Temperature\"]
          modbus:
            poll_interval_ms: 50
            targets:
              - host: 10.0.0.30
                registers:
                  - address: 100
    "};
    std::env::set_var("OTAGENT_E2E_AUTH", "authpass");
    std::env::set_var("OTAGENT_E2E_PRIV", "privpass");
    let mut config: AgentConfig = serde_yaml::from_str(yaml).expect("valid yaml");
    config.resolve_secrets().expect("secrets resolved");
    config.validate().expect("valid config");
    config
}

#[tokio::test]
async fn agent_collects_from_mock_sources_end_to_end() {
    let config = mock_agent_config();
    let manager = CollectorManager::from_config(&config);
    assert_eq!(manager.collectors().len(), 3);

    let mut events = manager.subscribe();
    manager.start().await;
    assert!(manager.is_running());

    // Wait until every collector has completed at least one cycle.
    let mut polled: Vec<String> = Vec::new();
    while polled.len() < 3 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for poll events")
            .expect("event channel closed")
        {
            ManagerEvent::Collector(CollectorEvent::Polled { collector, .. }) => {
                if !polled.contains(&collector) {
                    polled.push(collector);
                }
            }
            _ => continue,
        }
    }

    manager.stop().await;
    assert!(!manager.is_running());

    // No broker configured: everything landed in the local fallback.
    let envelopes = manager.publisher().drain_fallback();
    assert!(!envelopes.is_empty());

    let tags: Vec<&str> = envelopes
        .iter()
        .flat_map(|e| &e.data)
        .map(|record| record.data.type_tag())
        .collect();
    assert!(tags.contains(&"system"), "tags: {tags:?}");
    assert!(tags.contains(&"server_info"), "tags: {tags:?}");
    assert!(tags.contains(&"device_info"), "tags: {tags:?}");

    // Source tags match the producing strategy, snmp is never borrowed.
    for envelope in &envelopes {
        for record in &envelope.data {
            match record.data.type_tag() {
                "server_info" | "values" => {
                    assert_eq!(record.source, TelemetrySource::Opcua)
                }
                "device_info" | "scan" => {
                    assert_eq!(record.source, TelemetrySource::Modbus)
                }
                _ => {}
            }
        }
    }

    let stats = manager.statistics();
    assert_eq!(stats.collectors, 3);
    assert!(stats.total_poll_count >= 3);
    assert!(stats.total_data_points > 0);
    for status in manager.status().collectors {
        assert!(status.success_count + status.error_count <= status.poll_count);
    }
}

#[tokio::test]
async fn stopped_agent_emits_no_further_polls() {
    let config = mock_agent_config();
    let manager = CollectorManager::from_config(&config);
    let mut events = manager.subscribe();
    manager.start().await;

    // One full cycle, then stop.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
        {
            ManagerEvent::Collector(CollectorEvent::Polled { .. }) => break,
            _ => continue,
        }
    }
    manager.stop().await;
    let polls_at_stop = manager.statistics().total_poll_count;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.statistics().total_poll_count, polls_at_stop);
}

/// Scenario: a flaky target recovers within its retry budget and the
/// publisher is disconnected, so the local-emit hook receives the batch.
struct FlakyStrategy {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl SourceStrategy for FlakyStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Snmp
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, _target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < 2 {
            return Err(CollectError::Other {
                reason: "transient device fault".into(),
            });
        }
        Ok(vec![TelemetryRecord::new(
            TelemetrySource::Snmp,
            "snmp",
            RecordData::Arp { entries: vec![] },
        )])
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn retry_budget_recovers_target_and_fallback_receives_batches() {
    let publisher = Arc::new(Publisher::disconnected());
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    publisher.set_local_emit(move |envelope| {
        sink.lock().unwrap().push(envelope);
    });

    let collector = Collector::new(
        "snmp",
        TelemetrySource::Snmp,
        Arc::new(FlakyStrategy {
            calls: AtomicU32::new(0),
        }),
        CollectorSettings {
            retries: 3,
            poll_interval_ms: 3_600_000,
            ..CollectorSettings::default()
        },
        Arc::downgrade(&publisher),
    );
    collector.add_target(Target::new("10.0.0.1", TargetSpec::Listener).with_id("t1"));

    collector.poll_now().await;

    let status = collector.status();
    assert_eq!(status.success_count, 1);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.data_points_collected, 1);

    let envelopes = received.lock().unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].count, 1);
}
