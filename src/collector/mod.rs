//! The collection engine: one uniform lifecycle over heterogeneous
//! acquisition models.
//!
//! A [`Collector`] owns a [`SourceStrategy`] and drives it through a
//! periodic poll cycle with bounded intra-cycle parallelism, per-attempt
//! timeouts, retries, batching, and publishing. Strategies with their own
//! listener tasks (NetFlow, Syslog) buffer between ticks and treat
//! `collect` as a drain.

mod event;
mod status;

pub use event::{CollectorEvent, EventSender};
pub use status::{CollectorStatus, StatusHandle};

use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    ArpCollectType, CollectorSettings, CollectorSettingsPatch, ModbusRegisterConfig, Secret,
};
use crate::error::{CollectError, InitError};
use crate::publisher::Publisher;
use crate::record::{Envelope, RoutingProtocol, TelemetryRecord, TelemetrySource};
use crate::retry::{run_with_retry, RetryPolicy};

/// One device (or pseudo-device) a collector acquires from.
#[derive(Debug, Clone)]
pub struct Target {
    /// Unique within the owning collector.
    pub id: String,
    pub host: String,
    pub port: Option<u16>,
    pub enabled: bool,
    pub device_id: Option<String>,
    pub spec: TargetSpec,
}

impl Target {
    pub fn new(host: impl Into<String>, spec: TargetSpec) -> Self {
        Target {
            id: String::new(),
            host: host.into(),
            port: None,
            enabled: true,
            device_id: None,
            spec,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Source-specific target fields.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    Snmp(SnmpAuth),
    Arp {
        interface: Option<String>,
        collect_type: ArpCollectType,
    },
    Routing {
        collect_routes: bool,
        collect_neighbors: bool,
        protocols: Vec<RoutingProtocol>,
    },
    OpcUa {
        endpoint_url: String,
        security_mode: String,
        security_policy: String,
        monitored_nodes: Vec<String>,
    },
    Modbus {
        unit_id: u8,
        protocol: String,
        registers: Vec<ModbusRegisterConfig>,
    },
    /// Pseudo-target for passive collectors: the poll tick drains the
    /// listener's buffer.
    Listener,
}

/// SNMPv3 authPriv credentials. Secrets redact in debug output.
#[derive(Debug, Clone)]
pub struct SnmpAuth {
    pub sec_name: String,
    pub auth_protocol: String,
    pub auth_password: Secret,
    pub priv_protocol: String,
    pub priv_password: Secret,
}

/// The three hooks every source implements. `collect` runs concurrently
/// across targets within a chunk, so strategies keep mutable state behind
/// interior mutability.
#[async_trait]
pub trait SourceStrategy: Send + Sync + 'static {
    fn source(&self) -> TelemetrySource;

    /// One-time setup (open sockets, spawn listeners). A failure here is
    /// fatal for the collector.
    async fn initialize(&self) -> Result<(), InitError>;

    /// Acquire from one target, or drain the passive buffer for
    /// listener-backed sources.
    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError>;

    /// Release resources. Errors are logged, never propagated.
    async fn cleanup(&self) -> Result<(), CollectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything a poll cycle needs, cloneable into the scheduler task.
#[derive(Clone)]
struct CycleContext {
    name: Arc<str>,
    source: TelemetrySource,
    strategy: Arc<dyn SourceStrategy>,
    config: Arc<RwLock<CollectorSettings>>,
    targets: Arc<RwLock<IndexMap<String, Target>>>,
    status: Arc<StatusHandle>,
    events: EventSender,
    publisher: Weak<Publisher>,
}

pub struct Collector {
    ctx: CycleContext,
    state: Mutex<RunState>,
    scheduler: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Collector {
    pub fn new(
        name: impl Into<String>,
        source: TelemetrySource,
        strategy: Arc<dyn SourceStrategy>,
        settings: CollectorSettings,
        publisher: Weak<Publisher>,
    ) -> Self {
        Self::with_events(name, source, strategy, settings, publisher, EventSender::new())
    }

    /// Construct with an externally created event channel; used when the
    /// strategy itself holds a sender (syslog security events).
    pub fn with_events(
        name: impl Into<String>,
        source: TelemetrySource,
        strategy: Arc<dyn SourceStrategy>,
        settings: CollectorSettings,
        publisher: Weak<Publisher>,
        events: EventSender,
    ) -> Self {
        Collector {
            ctx: CycleContext {
                name: Arc::from(name.into()),
                source,
                strategy,
                config: Arc::new(RwLock::new(settings)),
                targets: Arc::new(RwLock::new(IndexMap::new())),
                status: Arc::new(StatusHandle::default()),
                events,
                publisher,
            },
            state: Mutex::new(RunState::Stopped),
            scheduler: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn source(&self) -> TelemetrySource {
        self.ctx.source
    }

    pub fn events(&self) -> &EventSender {
        &self.ctx.events
    }

    pub fn is_running(&self) -> bool {
        self.ctx.status.is_running()
    }

    pub fn status(&self) -> CollectorStatus {
        self.ctx.status.snapshot(&self.ctx.name)
    }

    pub fn config(&self) -> CollectorSettings {
        self.ctx.config.read().expect("config lock poisoned").clone()
    }

    /// Merge a partial settings update. A new interval takes effect once
    /// the current cycle's sleep is re-armed; in-flight work is never
    /// cancelled.
    pub fn update_config(&self, patch: &CollectorSettingsPatch) {
        self.ctx
            .config
            .write()
            .expect("config lock poisoned")
            .merge(patch);
    }

    /// Register a target. An empty id is assigned a fresh one; a known
    /// id replaces the existing target. Returns the effective id.
    pub fn add_target(&self, mut target: Target) -> String {
        if target.id.is_empty() {
            target.id = uuid::Uuid::new_v4().to_string();
        }
        let id = target.id.clone();
        let replaced = self
            .ctx
            .targets
            .write()
            .expect("targets lock poisoned")
            .insert(id.clone(), target)
            .is_some();
        if replaced {
            debug!(collector = %self.ctx.name, target = %id, "replaced existing target");
        }
        id
    }

    pub fn remove_target(&self, id: &str) -> bool {
        self.ctx
            .targets
            .write()
            .expect("targets lock poisoned")
            .shift_remove(id)
            .is_some()
    }

    pub fn set_target_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut targets = self.ctx.targets.write().expect("targets lock poisoned");
        match targets.get_mut(id) {
            Some(target) => {
                target.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Copy of the target registry, in registration order.
    pub fn targets(&self) -> Vec<Target> {
        self.ctx
            .targets
            .read()
            .expect("targets lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Start the collector: initialize the strategy, poll immediately,
    /// then poll on the configured interval. Idempotent; a disabled
    /// collector is a successful no-op.
    pub async fn start(&self) -> Result<(), InitError> {
        {
            let mut state = self.state.lock().await;
            if *state != RunState::Stopped {
                debug!(collector = %self.ctx.name, "start ignored, collector not stopped");
                return Ok(());
            }
            if !self.config().enabled {
                info!(collector = %self.ctx.name, "collector disabled, not starting");
                return Ok(());
            }
            *state = RunState::Starting;
        }

        if let Err(e) = self.ctx.strategy.initialize().await {
            self.ctx.status.set_last_error(e.to_string());
            *self.state.lock().await = RunState::Stopped;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler_loop(self.ctx.clone(), cancel.clone()));
        *self.scheduler.lock().await = Some((cancel, handle));

        *self.state.lock().await = RunState::Running;
        self.ctx.status.set_running(true);
        info!(collector = %self.ctx.name, "collector started");
        self.ctx.events.emit(CollectorEvent::Started {
            collector: self.ctx.name.to_string(),
        });
        Ok(())
    }

    /// Stop the collector: cancel the scheduler (the in-flight cycle is
    /// allowed to finish), then run strategy cleanup. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, RunState::Stopped | RunState::Stopping) {
                debug!(collector = %self.ctx.name, "stop ignored, collector not running");
                return;
            }
            *state = RunState::Stopping;
        }

        if let Some((cancel, handle)) = self.scheduler.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(collector = %self.ctx.name, error = %e, "scheduler task aborted");
            }
        }

        if let Err(e) = self.ctx.strategy.cleanup().await {
            warn!(collector = %self.ctx.name, error = %e, "strategy cleanup failed");
        }

        self.ctx.status.set_running(false);
        *self.state.lock().await = RunState::Stopped;
        info!(collector = %self.ctx.name, "collector stopped");
        self.ctx.events.emit(CollectorEvent::Stopped {
            collector: self.ctx.name.to_string(),
        });
    }

    pub async fn restart(&self) -> Result<(), InitError> {
        self.stop().await;
        self.start().await
    }

    /// Run one poll cycle synchronously. Exposed for embedders that
    /// drive collection on their own cadence (and for tests).
    pub async fn poll_now(&self) {
        run_poll_cycle(&self.ctx).await;
    }
}

async fn scheduler_loop(ctx: CycleContext, cancel: CancellationToken) {
    loop {
        run_poll_cycle(&ctx).await;
        // Interval is re-read every iteration so config updates apply
        // after the in-flight cycle, never mid-cycle.
        let interval = ctx
            .config
            .read()
            .expect("config lock poisoned")
            .poll_interval();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(collector = %ctx.name, "scheduler loop exited");
}

async fn run_poll_cycle(ctx: &CycleContext) {
    let started = Instant::now();
    ctx.status.begin_poll();

    let settings = ctx.config.read().expect("config lock poisoned").clone();
    let enabled: Vec<Target> = ctx
        .targets
        .read()
        .expect("targets lock poisoned")
        .values()
        .filter(|t| t.enabled)
        .cloned()
        .collect();

    if enabled.is_empty() {
        warn!(collector = %ctx.name, "no enabled targets, skipping poll cycle");
        return;
    }

    let policy = RetryPolicy::new(settings.retries, settings.timeout());
    let max_concurrent = settings.max_concurrent.max(1);
    let mut records: Vec<TelemetryRecord> = Vec::new();
    let mut failed_targets = 0usize;

    // Bounded parallelism: each chunk runs concurrently, chunks run in
    // order, and the cycle waits for the whole chunk before moving on.
    for chunk in enabled.chunks(max_concurrent) {
        let attempts = chunk.iter().map(|target| {
            let strategy = Arc::clone(&ctx.strategy);
            let label = format!("{}/{}", ctx.name, target.id);
            async move {
                let result =
                    run_with_retry(policy, &label, || strategy.collect(target)).await;
                (target, result)
            }
        });
        for (target, result) in join_all(attempts).await {
            match result {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    failed_targets += 1;
                    ctx.status.record_error(e.to_string());
                    warn!(
                        collector = %ctx.name,
                        target = %target.id,
                        host = %target.host,
                        error = %e,
                        "target collection failed"
                    );
                    ctx.events.emit(CollectorEvent::Error {
                        collector: ctx.name.to_string(),
                        target_id: Some(target.id.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    let total = records.len();
    if total > 0 {
        match ctx.publisher.upgrade() {
            Some(publisher) => {
                for batch in records.chunks(settings.batch_size.max(1)) {
                    let envelope = Envelope::new(&ctx.name, ctx.source, batch.to_vec());
                    publisher.publish(envelope).await;
                }
                ctx.status.add_data_points(total as u64);
            }
            None => warn!(
                collector = %ctx.name,
                records = total,
                "publisher dropped, discarding records"
            ),
        }
    }

    if failed_targets == 0 {
        ctx.status.record_success();
    }

    let duration = started.elapsed();
    debug!(
        collector = %ctx.name,
        records = total,
        failed_targets,
        duration_ms = duration.as_millis() as u64,
        "poll cycle finished"
    );
    ctx.events.emit(CollectorEvent::Polled {
        collector: ctx.name.to_string(),
        duration,
        record_count: total,
    });
}
