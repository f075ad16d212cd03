//! Syslog collection: a UDP or TCP listener fills a bounded buffer, the
//! poll tick drains it into a security record and a volume summary.
//! High-severity messages additionally surface on the collector's event
//! channel the moment they arrive.

mod classify;
mod parser;

pub use classify::{
    is_security_relevant, severity_distribution, top_hosts, HIGH_SEVERITY_MAX,
    SECURITY_FACILITIES, SECURITY_KEYWORDS,
};
pub use parser::{parse_message, parse_message_at};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::StreamExt;
use snafu::ResultExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::PassiveBuffer;
use crate::collector::{CollectorEvent, EventSender, SourceStrategy, Target};
use crate::config::{SyslogCollectorConfig, SyslogProtocol};
use crate::error::{self, CollectError, InitError};
use crate::record::{RecordData, SyslogMessage, TelemetryRecord, TelemetrySource, TimeRange};

/// Decoded messages held between drain ticks.
pub const SYSLOG_BUFFER_CAP: usize = 50_000;

const TOP_HOSTS_LIMIT: usize = 5;
const MAX_DATAGRAM: usize = 65_535;
const MAX_LINE_LEN: usize = 16 * 1024;

pub struct SyslogStrategy {
    bind: String,
    port: u16,
    protocol: SyslogProtocol,
    buffer: Arc<PassiveBuffer<SyslogMessage>>,
    events: EventSender,
    listener: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    local_addr: StdMutex<Option<SocketAddr>>,
}

impl SyslogStrategy {
    pub fn new(config: &SyslogCollectorConfig, events: EventSender) -> Self {
        SyslogStrategy {
            bind: config.bind.clone(),
            port: config.port,
            protocol: config.protocol,
            buffer: Arc::new(PassiveBuffer::new("syslog", SYSLOG_BUFFER_CAP)),
            events,
            listener: tokio::sync::Mutex::new(None),
            local_addr: StdMutex::new(None),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("addr lock poisoned")
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Parse one frame and buffer it; severity ≤ 3 also goes out on the
/// event channel immediately. Unparseable frames drop with a debug log.
fn ingest(
    line: &str,
    source_ip: &str,
    buffer: &PassiveBuffer<SyslogMessage>,
    events: &EventSender,
) {
    match parser::parse_message(line, source_ip) {
        Ok(message) => {
            if classify::is_high_severity(&message) {
                events.emit(CollectorEvent::SecurityEvent {
                    collector: "syslog".to_string(),
                    message: Box::new(message.clone()),
                });
            }
            buffer.push(message);
        }
        Err(e) => debug!(%source_ip, error = %e, "dropping unparseable syslog frame"),
    }
}

async fn udp_listener_loop(
    socket: UdpSocket,
    buffer: Arc<PassiveBuffer<SyslogMessage>>,
    events: EventSender,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    ingest(&text, &peer.ip().to_string(), &buffer, &events);
                }
                Err(e) => warn!(error = %e, "syslog udp receive error"),
            },
        }
    }
    debug!("syslog udp listener exited");
}

async fn tcp_listener_loop(
    listener: TcpListener,
    buffer: Arc<PassiveBuffer<SyslogMessage>>,
    events: EventSender,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let buffer = Arc::clone(&buffer);
                    let events = events.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let source_ip = peer.ip().to_string();
                        let mut frames = FramedRead::new(
                            stream,
                            LinesCodec::new_with_max_length(MAX_LINE_LEN),
                        );
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                frame = frames.next() => match frame {
                                    Some(Ok(line)) if !line.trim().is_empty() => {
                                        ingest(&line, &source_ip, &buffer, &events);
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        debug!(%source_ip, error = %e, "syslog tcp frame error");
                                    }
                                    None => break,
                                },
                            }
                        }
                        debug!(%source_ip, "syslog tcp connection closed");
                    });
                }
                Err(e) => warn!(error = %e, "syslog tcp accept error"),
            },
        }
    }
    debug!("syslog tcp listener exited");
}

#[async_trait]
impl SourceStrategy for SyslogStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Syslog
    }

    async fn initialize(&self) -> Result<(), InitError> {
        let addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .context(error::ListenerAddrSnafu {
                addr: format!("{}:{}", self.bind, self.port),
            })?;
        let cancel = CancellationToken::new();

        let handle = match self.protocol {
            SyslogProtocol::Udp => {
                let socket = UdpSocket::bind(addr).await.context(error::BindSnafu {
                    proto: "udp",
                    addr: addr.to_string(),
                })?;
                let local = socket.local_addr().context(error::BindSnafu {
                    proto: "udp",
                    addr: addr.to_string(),
                })?;
                *self.local_addr.lock().expect("addr lock poisoned") = Some(local);
                info!(addr = %local, "syslog udp listener bound");
                tokio::spawn(udp_listener_loop(
                    socket,
                    Arc::clone(&self.buffer),
                    self.events.clone(),
                    cancel.clone(),
                ))
            }
            SyslogProtocol::Tcp => {
                let listener = TcpListener::bind(addr).await.context(error::BindSnafu {
                    proto: "tcp",
                    addr: addr.to_string(),
                })?;
                let local = listener.local_addr().context(error::BindSnafu {
                    proto: "tcp",
                    addr: addr.to_string(),
                })?;
                *self.local_addr.lock().expect("addr lock poisoned") = Some(local);
                info!(addr = %local, "syslog tcp listener bound");
                tokio::spawn(tcp_listener_loop(
                    listener,
                    Arc::clone(&self.buffer),
                    self.events.clone(),
                    cancel.clone(),
                ))
            }
        };

        *self.listener.lock().await = Some((cancel, handle));
        Ok(())
    }

    async fn collect(&self, _target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let drained = self.buffer.drain();
        if drained.is_empty() {
            return Ok(Vec::new());
        }

        let distribution = classify::severity_distribution(&drained);
        let start = drained
            .iter()
            .map(|m| m.timestamp)
            .min()
            .unwrap_or_else(chrono::Utc::now);
        let end = drained
            .iter()
            .map(|m| m.timestamp)
            .max()
            .unwrap_or_else(chrono::Utc::now);

        let security: Vec<SyslogMessage> = drained
            .iter()
            .filter(|m| classify::is_security_relevant(m))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(2);
        if !security.is_empty() {
            records.push(TelemetryRecord::new(
                TelemetrySource::Syslog,
                "syslog",
                RecordData::Syslog {
                    security_event_count: security.len() as u64,
                    severity_distribution: distribution.clone(),
                    messages: security,
                },
            ));
        }
        records.push(TelemetryRecord::new(
            TelemetrySource::Syslog,
            "syslog",
            RecordData::SyslogSummary {
                total_count: drained.len() as u64,
                time_range: TimeRange { start, end },
                severity_distribution: distribution,
                top_hosts: classify::top_hosts(&drained, TOP_HOSTS_LIMIT),
            },
        ));
        debug!(
            total = drained.len(),
            records = records.len(),
            "drained syslog buffer"
        );
        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        if let Some((cancel, handle)) = self.listener.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        *self.local_addr.lock().expect("addr lock poisoned") = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::TargetSpec;

    fn strategy() -> SyslogStrategy {
        SyslogStrategy::new(&SyslogCollectorConfig::default(), EventSender::new())
    }

    fn listener_target() -> Target {
        Target::new("0.0.0.0", TargetSpec::Listener).with_id("listener")
    }

    #[tokio::test]
    async fn empty_buffer_emits_nothing() {
        let strategy = strategy();
        assert!(strategy.collect(&listener_target()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_emits_security_and_summary_records() {
        let strategy = strategy();
        ingest(
            "<34>1 2024-01-01T00:00:00Z host sshd 123 - - Failed password for root",
            "10.0.0.50",
            &strategy.buffer,
            &strategy.events,
        );
        ingest(
            "<30>1 2024-01-01T00:00:01Z host cron 99 - - job finished",
            "10.0.0.50",
            &strategy.buffer,
            &strategy.events,
        );

        let records = strategy.collect(&listener_target()).await.unwrap();
        assert_eq!(records.len(), 2);

        match &records[0].data {
            RecordData::Syslog {
                security_event_count,
                messages,
                ..
            } => {
                assert_eq!(*security_event_count, 1);
                assert_eq!(messages[0].app_name.as_deref(), Some("sshd"));
            }
            other => panic!("unexpected record {other:?}"),
        }
        match &records[1].data {
            RecordData::SyslogSummary {
                total_count,
                top_hosts,
                severity_distribution,
                ..
            } => {
                assert_eq!(*total_count, 2);
                assert_eq!(top_hosts[0].hostname, "host");
                assert_eq!(top_hosts[0].count, 2);
                assert_eq!(severity_distribution[&2], 1);
                assert_eq!(severity_distribution[&6], 1);
            }
            other => panic!("unexpected record {other:?}"),
        }

        // Buffer is drained; nothing on the next tick.
        assert!(strategy.collect(&listener_target()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn benign_traffic_skips_the_security_record() {
        let strategy = strategy();
        ingest(
            "<30>1 2024-01-01T00:00:01Z host cron 99 - - job finished",
            "10.0.0.50",
            &strategy.buffer,
            &strategy.events,
        );
        let records = strategy.collect(&listener_target()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].data, RecordData::SyslogSummary { .. }));
    }

    #[tokio::test]
    async fn high_severity_emits_immediate_security_event() {
        let strategy = strategy();
        let mut events = strategy.events.subscribe();
        ingest(
            "<34>1 2024-01-01T00:00:00Z host sshd 123 - - Failed password for root",
            "10.0.0.50",
            &strategy.buffer,
            &strategy.events,
        );
        match events.recv().await.unwrap() {
            CollectorEvent::SecurityEvent { message, .. } => {
                assert_eq!(message.severity, 2);
                assert_eq!(message.facility, 4);
                assert_eq!(message.app_name.as_deref(), Some("sshd"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        // Still buffered for the normal drain path too.
        assert_eq!(strategy.buffered(), 1);
    }

    #[tokio::test]
    async fn low_severity_does_not_emit_events() {
        let strategy = strategy();
        let mut events = strategy.events.subscribe();
        ingest(
            "<30>1 2024-01-01T00:00:01Z host cron 99 - - job finished",
            "10.0.0.50",
            &strategy.buffer,
            &strategy.events,
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unparseable_frames_are_dropped() {
        let strategy = strategy();
        ingest("no pri here", "10.0.0.50", &strategy.buffer, &strategy.events);
        assert_eq!(strategy.buffered(), 0);
    }

    #[tokio::test]
    async fn initialize_binds_udp_and_cleanup_releases() {
        let config = SyslogCollectorConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let strategy = SyslogStrategy::new(&config, EventSender::new());
        strategy.initialize().await.unwrap();
        assert!(strategy.local_addr().is_some());
        strategy.cleanup().await.unwrap();
        assert!(strategy.local_addr().is_none());
    }

    #[tokio::test]
    async fn initialize_binds_tcp() {
        let config = SyslogCollectorConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            protocol: SyslogProtocol::Tcp,
            ..Default::default()
        };
        let strategy = SyslogStrategy::new(&config, EventSender::new());
        strategy.initialize().await.unwrap();
        assert!(strategy.local_addr().is_some());
        strategy.cleanup().await.unwrap();
    }
}
