//! NetFlow v5/v9 collection: a UDP listener fills a bounded buffer, the
//! poll tick drains and aggregates.

mod v5;
mod v9;

pub use v9::{Template, TemplateCache, TemplateField};

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::ResultExt;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::PassiveBuffer;
use crate::collector::{SourceStrategy, Target};
use crate::config::{NetflowCollectorConfig, NetflowVersion};
use crate::error::{self, CollectError, InitError};
use crate::record::{FlowRecord, RecordData, TelemetryRecord, TelemetrySource};

/// Decoded flows held between drain ticks.
pub const NETFLOW_BUFFER_CAP: usize = 10_000;

const MAX_DATAGRAM: usize = 65_535;

pub struct NetflowStrategy {
    bind: String,
    port: u16,
    version: NetflowVersion,
    buffer: Arc<PassiveBuffer<FlowRecord>>,
    cache: Arc<StdMutex<TemplateCache>>,
    listener: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    local_addr: StdMutex<Option<SocketAddr>>,
}

impl NetflowStrategy {
    pub fn new(config: &NetflowCollectorConfig) -> Self {
        NetflowStrategy {
            bind: config.bind.clone(),
            port: config.port,
            version: config.version,
            buffer: Arc::new(PassiveBuffer::new("netflow", NETFLOW_BUFFER_CAP)),
            cache: Arc::new(StdMutex::new(TemplateCache::default())),
            listener: tokio::sync::Mutex::new(None),
            local_addr: StdMutex::new(None),
        }
    }

    /// The bound listener address, once initialized. Lets deployments
    /// bind port 0 and report the effective port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("addr lock poisoned")
    }

    /// Buffered flow count (listener side, pre-drain).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Parse one datagram and buffer whatever it yields. Malformed frames
/// are dropped with a debug log.
fn handle_datagram(
    buf: &[u8],
    peer: IpAddr,
    accept: NetflowVersion,
    buffer: &PassiveBuffer<FlowRecord>,
    cache: &StdMutex<TemplateCache>,
) {
    if buf.len() < 2 {
        return;
    }
    let version = u16::from_be_bytes([buf[0], buf[1]]);
    if !accept.accepts(version) {
        debug!(%peer, version, "netflow version not accepted by config, dropping datagram");
        return;
    }
    let parsed = match version {
        5 => v5::parse_packet(buf),
        9 => {
            let mut cache = cache.lock().expect("template cache poisoned");
            v9::parse_packet(buf, peer, &mut cache)
        }
        other => {
            debug!(%peer, version = other, "unsupported netflow version, dropping datagram");
            return;
        }
    };
    match parsed {
        Ok(flows) => buffer.extend(flows),
        Err(e) => debug!(%peer, error = %e, "malformed netflow datagram dropped"),
    }
}

async fn listener_loop(
    socket: UdpSocket,
    accept: NetflowVersion,
    buffer: Arc<PassiveBuffer<FlowRecord>>,
    cache: Arc<StdMutex<TemplateCache>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    handle_datagram(&buf[..len], peer.ip(), accept, &buffer, &cache)
                }
                Err(e) => {
                    warn!(error = %e, "netflow udp receive error");
                }
            },
        }
    }
    debug!("netflow listener exited");
}

/// Aggregate by 5-tuple: bytes/packets summed, the time window widened,
/// TCP flags unioned. Associative over concatenation of inputs.
pub fn aggregate_flows(flows: Vec<FlowRecord>) -> Vec<FlowRecord> {
    let mut grouped: IndexMap<(String, u16, String, u16, u8), FlowRecord> = IndexMap::new();
    for flow in flows {
        let key = (
            flow.src_address.clone(),
            flow.src_port,
            flow.dst_address.clone(),
            flow.dst_port,
            flow.protocol,
        );
        match grouped.get_mut(&key) {
            Some(agg) => {
                agg.bytes += flow.bytes;
                agg.packets += flow.packets;
                agg.start_time = agg.start_time.min(flow.start_time);
                agg.end_time = agg.end_time.max(flow.end_time);
                agg.tcp_flags = match (agg.tcp_flags, flow.tcp_flags) {
                    (Some(a), Some(b)) => Some(a | b),
                    (a, b) => a.or(b),
                };
                if agg.tos.is_none() {
                    agg.tos = flow.tos;
                }
            }
            None => {
                grouped.insert(key, flow);
            }
        }
    }
    grouped.into_values().collect()
}

#[async_trait]
impl SourceStrategy for NetflowStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Netflow
    }

    async fn initialize(&self) -> Result<(), InitError> {
        let addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .context(error::ListenerAddrSnafu {
                addr: format!("{}:{}", self.bind, self.port),
            })?;
        let socket = UdpSocket::bind(addr).await.context(error::BindSnafu {
            proto: "udp",
            addr: addr.to_string(),
        })?;
        let local = socket.local_addr().context(error::BindSnafu {
            proto: "udp",
            addr: addr.to_string(),
        })?;
        *self.local_addr.lock().expect("addr lock poisoned") = Some(local);
        info!(addr = %local, "netflow listener bound");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listener_loop(
            socket,
            self.version,
            Arc::clone(&self.buffer),
            Arc::clone(&self.cache),
            cancel.clone(),
        ));
        *self.listener.lock().await = Some((cancel, handle));
        Ok(())
    }

    async fn collect(&self, _target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let drained = self.buffer.drain();
        if drained.is_empty() {
            return Ok(Vec::new());
        }
        let raw_count = drained.len();
        let flows = aggregate_flows(drained);
        debug!(raw = raw_count, aggregated = flows.len(), "drained netflow buffer");
        Ok(vec![TelemetryRecord::new(
            TelemetrySource::Netflow,
            "netflow",
            RecordData::Netflow { flows },
        )])
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
