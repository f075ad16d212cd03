//! Composition and supervision of the collector set.
//!
//! The manager owns the shared publisher, starts and stops collectors in
//! parallel (per-collector failures are logged and swallowed so the
//! agent stays partially functional), fans their events into one
//! channel, and runs the periodic health check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collector::{Collector, CollectorEvent, CollectorStatus};
use crate::config::AgentConfig;
use crate::publisher::Publisher;
use crate::sources::build_collectors;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const MANAGER_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Re-broadcast of one collector's event.
    Collector(CollectorEvent),
    HealthCheck {
        statuses: Vec<CollectorStatus>,
        unhealthy_count: usize,
    },
}

/// Aggregate snapshot served by the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub mqtt_connected: bool,
    pub collectors: Vec<CollectorStatus>,
}

/// Monotonic sums across collectors.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatistics {
    pub collectors: usize,
    pub total_poll_count: u64,
    pub total_success_count: u64,
    pub total_error_count: u64,
    pub total_data_points: u64,
    pub uptime_seconds: u64,
}

pub struct CollectorManager {
    collectors: Vec<Arc<Collector>>,
    publisher: Arc<Publisher>,
    running: AtomicBool,
    started_at: StdMutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ManagerEvent>,
    health_interval: Duration,
    tasks: tokio::sync::Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl CollectorManager {
    /// Build the manager, publisher, and every enabled collector from
    /// the loaded configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        let publisher = Arc::new(match &config.mqtt {
            Some(mqtt) => Publisher::new(mqtt.clone()),
            None => Publisher::disconnected(),
        });
        let collectors = build_collectors(&config.collectors, &publisher);
        Self::with_parts(collectors, publisher)
    }

    /// Assemble from pre-built parts; the constructor tests use.
    pub fn with_parts(collectors: Vec<Arc<Collector>>, publisher: Arc<Publisher>) -> Self {
        let (events, _) = broadcast::channel(MANAGER_EVENT_CAPACITY);
        CollectorManager {
            collectors,
            publisher,
            running: AtomicBool::new(false),
            started_at: StdMutex::new(None),
            events,
            health_interval: HEALTH_CHECK_INTERVAL,
            tasks: tokio::sync::Mutex::new(None),
        }
    }

    /// Shorten the health-check period (tests).
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn collectors(&self) -> &[Arc<Collector>] {
        &self.collectors
    }

    pub fn collector(&self, name: &str) -> Option<&Arc<Collector>> {
        self.collectors.iter().find(|c| c.name() == name)
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Connect the publisher (failure logged, not fatal), start every
    /// collector in parallel (failures logged, the rest keep going),
    /// then install the health check.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(collectors = self.collectors.len(), "starting collector manager");

        if self.publisher.is_configured() {
            if let Err(e) = self.publisher.connect().await {
                warn!(error = %e, "mqtt connect failed, continuing with local emit");
            }
        }

        join_all(self.collectors.iter().map(|collector| async move {
            if let Err(e) = collector.start().await {
                error!(
                    collector = %collector.name(),
                    error = %e,
                    "collector failed to start, continuing without it"
                );
            }
        }))
        .await;

        *self.started_at.lock().expect("started_at lock poisoned") = Some(Utc::now());

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // Event fan-in, one task per collector.
        for collector in &self.collectors {
            let mut rx = collector.events().subscribe();
            let events = self.events.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = rx.recv() => match received {
                            Ok(event) => {
                                let _ = events.send(ManagerEvent::Collector(event));
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "manager event fan-in lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            }));
        }

        // Periodic health check.
        {
            let collectors = self.collectors.clone();
            let events = self.events.clone();
            let interval = self.health_interval;
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            let statuses: Vec<CollectorStatus> =
                                collectors.iter().map(|c| c.status()).collect();
                            let unhealthy: Vec<&CollectorStatus> =
                                statuses.iter().filter(|s| !s.running).collect();
                            let unhealthy_count = unhealthy.len();
                            if unhealthy_count > 0 {
                                warn!(
                                    unhealthy = ?unhealthy
                                        .iter()
                                        .map(|s| s.name.as_str())
                                        .collect::<Vec<_>>(),
                                    "health check found stopped collectors"
                                );
                            }
                            let _ = events.send(ManagerEvent::HealthCheck {
                                statuses,
                                unhealthy_count,
                            });
                        }
                    }
                }
            }));
        }

        *self.tasks.lock().await = Some((cancel, tasks));
        info!("collector manager started");
    }

    /// Stop the health check and every collector, then disconnect the
    /// publisher. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping collector manager");

        if let Some((cancel, tasks)) = self.tasks.lock().await.take() {
            cancel.cancel();
            for task in tasks {
                let _ = task.await;
            }
        }

        join_all(self.collectors.iter().map(|collector| collector.stop())).await;
        self.publisher.disconnect().await;
        info!("collector manager stopped");
    }

    pub async fn restart(&self) {
        self.stop().await;
        self.start().await;
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            is_running: self.is_running(),
            started_at: *self.started_at.lock().expect("started_at lock poisoned"),
            mqtt_connected: self.publisher.is_connected(),
            collectors: self.collectors.iter().map(|c| c.status()).collect(),
        }
    }

    pub fn statistics(&self) -> AgentStatistics {
        let statuses: Vec<CollectorStatus> = self.collectors.iter().map(|c| c.status()).collect();
        let uptime_seconds = self
            .started_at
            .lock()
            .expect("started_at lock poisoned")
            .map(|started| (Utc::now() - started).num_seconds().max(0) as u64)
            .unwrap_or(0);
        AgentStatistics {
            collectors: statuses.len(),
            total_poll_count: statuses.iter().map(|s| s.poll_count).sum(),
            total_success_count: statuses.iter().map(|s| s.success_count).sum(),
            total_error_count: statuses.iter().map(|s| s.error_count).sum(),
            total_data_points: statuses.iter().map(|s| s.data_points_collected).sum(),
            uptime_seconds,
        }
    }
}

// Process-wide accessor, optional by design: embedders and the binary
// use it for convenience, tests construct managers directly.
static GLOBAL_MANAGER: StdMutex<Option<Arc<CollectorManager>>> = StdMutex::new(None);

pub fn global_manager() -> Option<Arc<CollectorManager>> {
    GLOBAL_MANAGER
        .lock()
        .expect("global manager lock poisoned")
        .clone()
}

pub fn set_global_manager(manager: Arc<CollectorManager>) {
    *GLOBAL_MANAGER
        .lock()
        .expect("global manager lock poisoned") = Some(manager);
}

pub fn reset_global_manager() {
    GLOBAL_MANAGER
        .lock()
        .expect("global manager lock poisoned")
        .take();
}
