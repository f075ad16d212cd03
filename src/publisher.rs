//! Batched telemetry delivery to MQTT with graceful degradation.
//!
//! One publisher is shared by every collector (the manager owns the
//! `Arc`, collectors hold a `Weak`). Publishes are QoS 1. When the broker
//! is unreachable the envelope goes to the local-emit hook instead; the
//! default hook is a bounded in-memory queue that is flushed after the
//! connection comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::PassiveBuffer;
use crate::config::MqttConfig;
use crate::error::PublishError;
use crate::record::Envelope;

/// Envelopes kept while the broker is unreachable. The only persistence
/// on the agent, bounded drop-oldest.
const FALLBACK_QUEUE_CAP: usize = 1_000;

const MQTT_CHANNEL_CAP: usize = 64;

type LocalEmitHook = Box<dyn Fn(Envelope) + Send + Sync>;

pub struct Publisher {
    config: Option<MqttConfig>,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    fallback: Arc<PassiveBuffer<Envelope>>,
    hook: RwLock<Option<LocalEmitHook>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    pub fn new(config: MqttConfig) -> Self {
        Publisher {
            config: Some(config),
            ..Self::disconnected()
        }
    }

    /// A publisher with no MQTT endpoint configured. Every envelope goes
    /// through the local-emit path.
    pub fn disconnected() -> Self {
        Publisher {
            config: None,
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            fallback: Arc::new(PassiveBuffer::new("publisher-fallback", FALLBACK_QUEUE_CAP)),
            hook: RwLock::new(None),
            driver: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Replace the local-emit hook. Without a hook, locally-emitted
    /// envelopes go to the bounded fallback queue.
    pub fn set_local_emit<F>(&self, hook: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        *self.hook.write().expect("hook lock poisoned") = Some(Box::new(hook));
    }

    /// Take everything queued by the default local-emit path.
    pub fn drain_fallback(&self) -> Vec<Envelope> {
        self.fallback.drain()
    }

    /// Open the MQTT connection and start the event-loop driver task.
    /// A publisher without an endpoint configured is a no-op.
    pub async fn connect(&self) -> Result<(), PublishError> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = &config.username {
            let password = config
                .password
                .as_ref()
                .map(|secret| secret.expose().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }
        if let Some(tls) = &config.tls {
            let ca = std::fs::read(&tls.ca_file).map_err(|e| PublishError::Mqtt {
                reason: format!("failed to read {}: {e}", tls.ca_file),
            })?;
            let client_auth = match (&tls.cert_file, &tls.key_file) {
                (Some(cert), Some(key)) => {
                    let cert = std::fs::read(cert).map_err(|e| PublishError::Mqtt {
                        reason: format!("failed to read {cert}: {e}"),
                    })?;
                    let key = std::fs::read(key).map_err(|e| PublishError::Mqtt {
                        reason: format!("failed to read {key}: {e}"),
                    })?;
                    Some((cert, key))
                }
                _ => None,
            };
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        let (client, mut event_loop) = AsyncClient::new(options, MQTT_CHANNEL_CAP);
        *self.client.lock().expect("client lock poisoned") = Some(client.clone());

        let connected = Arc::clone(&self.connected);
        let fallback = Arc::clone(&self.fallback);
        let topic = config.topic.clone();
        let host = config.host.clone();
        let driver = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%host, "mqtt connected");
                        connected.store(true, Ordering::SeqCst);
                        flush_fallback(&client, &topic, &fallback).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!(%host, "mqtt broker requested disconnect");
                        connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.swap(false, Ordering::SeqCst) {
                            warn!(%host, error = %e, "mqtt connection lost, reconnecting");
                        }
                        // The event loop reconnects on the next poll;
                        // pace it so a dead broker does not spin.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        *self.driver.lock().expect("driver lock poisoned") = Some(driver);
        Ok(())
    }

    pub async fn disconnect(&self) {
        let client = self.client.lock().expect("client lock poisoned").take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "mqtt disconnect failed");
            }
        }
        if let Some(driver) = self.driver.lock().expect("driver lock poisoned").take() {
            driver.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Deliver one envelope. Never fails from the caller's perspective:
    /// publish errors and disconnected states degrade to local emit.
    pub async fn publish(&self, envelope: Envelope) {
        if self.is_connected() {
            let client = self
                .client
                .lock()
                .expect("client lock poisoned")
                .clone();
            if let Some(client) = client {
                let topic = self
                    .config
                    .as_ref()
                    .map(|c| c.topic.as_str())
                    .unwrap_or("scada/telemetry");
                match encode(&envelope) {
                    Ok(payload) => {
                        match client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                            Ok(()) => {
                                debug!(
                                    collector = %envelope.collector,
                                    count = envelope.count,
                                    "published telemetry batch"
                                );
                                return;
                            }
                            Err(e) => {
                                warn!(
                                    collector = %envelope.collector,
                                    error = %e,
                                    "mqtt publish failed, falling back to local emit"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!(collector = %envelope.collector, error = %e, "dropping unencodable envelope");
                        return;
                    }
                }
            }
        }
        self.local_emit(envelope);
    }

    fn local_emit(&self, envelope: Envelope) {
        let hook = self.hook.read().expect("hook lock poisoned");
        if let Some(hook) = hook.as_ref() {
            hook(envelope);
        } else {
            debug!(
                collector = %envelope.collector,
                count = envelope.count,
                queued = self.fallback.len() + 1,
                "mqtt unavailable, queueing envelope locally"
            );
            self.fallback.push(envelope);
        }
    }
}

fn encode(envelope: &Envelope) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(envelope).map_err(|source| PublishError::Encode { source })
}

/// Re-publish everything queued while the broker was away.
async fn flush_fallback(client: &AsyncClient, topic: &str, fallback: &PassiveBuffer<Envelope>) {
    let queued = fallback.drain();
    if queued.is_empty() {
        return;
    }
    info!(count = queued.len(), "flushing locally queued envelopes");
    let mut pending = queued.into_iter();
    while let Some(envelope) = pending.next() {
        match encode(&envelope) {
            Ok(payload) => {
                if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                    warn!(error = %e, "failed to flush queued envelopes, requeueing");
                    fallback.push(envelope);
                    fallback.extend(pending);
                    return;
                }
            }
            Err(e) => error!(error = %e, "dropping unencodable queued envelope"),
        }
    }
}
