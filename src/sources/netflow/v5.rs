//! NetFlow v5 wire format: fixed 24-byte header, 48-byte records.

use std::net::Ipv4Addr;

use crate::error::ParseError;
use crate::record::FlowRecord;

pub const V5_HEADER_LEN: usize = 24;
pub const V5_RECORD_LEN: usize = 48;

#[derive(Debug, Clone)]
pub struct V5Header {
    pub version: u16,
    pub count: u16,
    pub sys_uptime: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling_interval: u16,
}

pub fn parse_header(buf: &[u8]) -> Result<V5Header, ParseError> {
    if buf.len() < V5_HEADER_LEN {
        return Err(ParseError::Truncated {
            needed: V5_HEADER_LEN,
            have: buf.len(),
        });
    }
    let version = be_u16(buf, 0);
    if version != 5 {
        return Err(ParseError::Unsupported {
            what: "netflow version",
            value: u32::from(version),
        });
    }
    Ok(V5Header {
        version,
        count: be_u16(buf, 2),
        sys_uptime: be_u32(buf, 4),
        unix_secs: be_u32(buf, 8),
        unix_nsecs: be_u32(buf, 12),
        flow_sequence: be_u32(buf, 16),
        engine_type: buf[20],
        engine_id: buf[21],
        sampling_interval: be_u16(buf, 22),
    })
}

/// Parse a complete v5 packet into normalized flows.
///
/// Uptime-relative `first`/`last` fields are rebased to unix epoch
/// milliseconds: `unix_secs * 1000 - (sys_uptime - field)`.
pub fn parse_packet(buf: &[u8]) -> Result<Vec<FlowRecord>, ParseError> {
    let header = parse_header(buf)?;
    let count = usize::from(header.count);
    let expected = V5_HEADER_LEN + count * V5_RECORD_LEN;
    if buf.len() < expected {
        return Err(ParseError::Truncated {
            needed: expected,
            have: buf.len(),
        });
    }

    let base_ms = i64::from(header.unix_secs) * 1000;
    let uptime = i64::from(header.sys_uptime);

    let mut flows = Vec::with_capacity(count);
    for i in 0..count {
        let rec = &buf[V5_HEADER_LEN + i * V5_RECORD_LEN..V5_HEADER_LEN + (i + 1) * V5_RECORD_LEN];
        let first = i64::from(be_u32(rec, 24));
        let last = i64::from(be_u32(rec, 28));
        flows.push(FlowRecord {
            src_address: ipv4(rec, 0).to_string(),
            dst_address: ipv4(rec, 4).to_string(),
            src_port: be_u16(rec, 32),
            dst_port: be_u16(rec, 34),
            protocol: rec[38],
            bytes: u64::from(be_u32(rec, 20)),
            packets: u64::from(be_u32(rec, 16)),
            start_time: base_ms - (uptime - first),
            end_time: base_ms - (uptime - last),
            tcp_flags: Some(rec[37]),
            tos: Some(rec[39]),
        });
    }
    Ok(flows)
}

pub(crate) fn be_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn ipv4(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3])
}
