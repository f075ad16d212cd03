//! NetFlow v9: template-driven flowsets.
//!
//! Template flowsets (id 0) register record layouts in the
//! [`TemplateCache`]; data flowsets (id ≥ 256) decode against them. Data
//! arriving before its template is dropped and logged, per protocol.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, trace};

use super::v5::{be_u16, be_u32, ipv4};
use crate::error::ParseError;
use crate::record::FlowRecord;

pub const V9_HEADER_LEN: usize = 20;

// Field type codes this decoder understands.
const IN_BYTES: u16 = 1;
const IN_PKTS: u16 = 2;
const PROTOCOL: u16 = 4;
const SRC_TOS: u16 = 5;
const TCP_FLAGS: u16 = 6;
const L4_SRC_PORT: u16 = 7;
const IPV4_SRC_ADDR: u16 = 8;
const L4_DST_PORT: u16 = 11;
const IPV4_DST_ADDR: u16 = 12;
const LAST_SWITCHED: u16 = 21;
const FIRST_SWITCHED: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateField {
    pub type_code: u16,
    pub length: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub template_id: u16,
    pub fields: Vec<TemplateField>,
}

impl Template {
    fn record_len(&self) -> usize {
        self.fields.iter().map(|f| usize::from(f.length)).sum()
    }
}

/// Templates keyed by `(exporter, template_id)`, so two exporters with
/// colliding template ids cannot corrupt each other's decoding.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<(IpAddr, u16), Template>,
}

impl TemplateCache {
    pub fn insert(&mut self, exporter: IpAddr, template: Template) {
        let id = template.template_id;
        if self
            .templates
            .insert((exporter, id), template)
            .is_some()
        {
            trace!(%exporter, template_id = id, "template re-sent, overwriting");
        }
    }

    pub fn get(&self, exporter: IpAddr, template_id: u16) -> Option<&Template> {
        self.templates.get(&(exporter, template_id))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct V9Header {
    pub version: u16,
    pub count: u16,
    pub sys_uptime: u32,
    pub unix_secs: u32,
    pub sequence: u32,
    pub source_id: u32,
}

fn parse_header(buf: &[u8]) -> Result<V9Header, ParseError> {
    if buf.len() < V9_HEADER_LEN {
        return Err(ParseError::Truncated {
            needed: V9_HEADER_LEN,
            have: buf.len(),
        });
    }
    let version = be_u16(buf, 0);
    if version != 9 {
        return Err(ParseError::Unsupported {
            what: "netflow version",
            value: u32::from(version),
        });
    }
    Ok(V9Header {
        version,
        count: be_u16(buf, 2),
        sys_uptime: be_u32(buf, 4),
        unix_secs: be_u32(buf, 8),
        sequence: be_u32(buf, 12),
        source_id: be_u32(buf, 16),
    })
}

/// Parse one v9 packet, learning templates and decoding what can be
/// decoded. Flowsets without a cached template are skipped, not errors.
pub fn parse_packet(
    buf: &[u8],
    exporter: IpAddr,
    cache: &mut TemplateCache,
) -> Result<Vec<FlowRecord>, ParseError> {
    let header = parse_header(buf)?;
    let base_ms = i64::from(header.unix_secs) * 1000;
    let uptime = i64::from(header.sys_uptime);

    let mut flows = Vec::new();
    let mut offset = V9_HEADER_LEN;

    while offset + 4 <= buf.len() {
        let flowset_id = be_u16(buf, offset);
        let length = usize::from(be_u16(buf, offset + 2));
        if length < 4 || offset + length > buf.len() {
            return Err(ParseError::Truncated {
                needed: offset + length.max(4),
                have: buf.len(),
            });
        }
        let body = &buf[offset + 4..offset + length];

        match flowset_id {
            0 => parse_templates(body, exporter, cache)?,
            1 => {
                // Options templates: acknowledged and ignored.
                trace!(%exporter, "ignoring v9 options template flowset");
            }
            id if id >= 256 => match cache.get(exporter, id) {
                Some(template) => {
                    decode_data_flowset(body, template, base_ms, uptime, &mut flows);
                }
                None => {
                    debug!(
                        %exporter,
                        template_id = id,
                        "data flowset before template, dropping"
                    );
                }
            },
            id => {
                // Reserved flowset ids 2..=255: skip by declared length.
                trace!(%exporter, flowset_id = id, "skipping reserved flowset");
            }
        }
        offset += length;
    }

    Ok(flows)
}

fn parse_templates(
    mut body: &[u8],
    exporter: IpAddr,
    cache: &mut TemplateCache,
) -> Result<(), ParseError> {
    // One template flowset can carry several templates back to back;
    // trailing padding shorter than a template header terminates.
    while body.len() >= 4 {
        let template_id = be_u16(body, 0);
        let field_count = usize::from(be_u16(body, 2));
        if template_id == 0 && field_count == 0 {
            break;
        }
        let needed = 4 + field_count * 4;
        if body.len() < needed {
            return Err(ParseError::Truncated {
                needed,
                have: body.len(),
            });
        }
        let fields = (0..field_count)
            .map(|i| TemplateField {
                type_code: be_u16(body, 4 + i * 4),
                length: be_u16(body, 6 + i * 4),
            })
            .collect();
        cache.insert(
            exporter,
            Template {
                template_id,
                fields,
            },
        );
        body = &body[needed..];
    }
    Ok(())
}

fn decode_data_flowset(
    body: &[u8],
    template: &Template,
    base_ms: i64,
    uptime: i64,
    flows: &mut Vec<FlowRecord>,
) {
    let record_len = template.record_len();
    if record_len == 0 {
        return;
    }
    let mut offset = 0;
    // Remaining bytes shorter than a record are flowset padding.
    while offset + record_len <= body.len() {
        flows.push(decode_record(
            &body[offset..offset + record_len],
            template,
            base_ms,
            uptime,
        ));
        offset += record_len;
    }
}

fn decode_record(rec: &[u8], template: &Template, base_ms: i64, uptime: i64) -> FlowRecord {
    let mut flow = FlowRecord {
        src_address: String::new(),
        dst_address: String::new(),
        src_port: 0,
        dst_port: 0,
        protocol: 0,
        bytes: 0,
        packets: 0,
        start_time: base_ms,
        end_time: base_ms,
        tcp_flags: None,
        tos: None,
    };

    let mut offset = 0;
    for field in &template.fields {
        let len = usize::from(field.length);
        let value = &rec[offset..offset + len];
        match field.type_code {
            // Counters accept 4- or 8-byte widths. Single-byte fields
            // guard against hostile templates declaring length 0.
            IN_BYTES => flow.bytes = be_uint(value),
            IN_PKTS => flow.packets = be_uint(value),
            PROTOCOL if len >= 1 => flow.protocol = value[0],
            SRC_TOS if len >= 1 => flow.tos = Some(value[0]),
            TCP_FLAGS if len >= 1 => flow.tcp_flags = Some(value[0]),
            L4_SRC_PORT if len >= 2 => flow.src_port = be_u16(value, 0),
            IPV4_SRC_ADDR if len >= 4 => flow.src_address = ipv4(value, 0).to_string(),
            L4_DST_PORT if len >= 2 => flow.dst_port = be_u16(value, 0),
            IPV4_DST_ADDR if len >= 4 => flow.dst_address = ipv4(value, 0).to_string(),
            FIRST_SWITCHED if len >= 4 => {
                flow.start_time = base_ms - (uptime - i64::from(be_u32(value, 0)));
            }
            LAST_SWITCHED if len >= 4 => {
                flow.end_time = base_ms - (uptime - i64::from(be_u32(value, 0)));
            }
            // Unknown field types advance by their declared length.
            _ => {}
        }
        offset += len;
    }
    flow
}

/// Big-endian unsigned integer of 1..=8 bytes.
fn be_uint(buf: &[u8]) -> u64 {
    buf.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    pub(crate) const EXPORTER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));

    fn v9_header(count: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&9u16.to_be_bytes());
        buf.extend_from_slice(&count.to_be_bytes());
        buf.extend_from_slice(&1_000u32.to_be_bytes()); // sys_uptime
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes()); // unix_secs
        buf.extend_from_slice(&7u32.to_be_bytes()); // sequence
        buf.extend_from_slice(&0u32.to_be_bytes()); // source_id
        buf
    }

    /// Template flowset: id 256 with src/dst addr + bytes + packets.
    pub(crate) fn template_packet() -> Vec<u8> {
        let mut buf = v9_header(1);
        let fields: [(u16, u16); 4] = [
            (IPV4_SRC_ADDR, 4),
            (IPV4_DST_ADDR, 4),
            (IN_BYTES, 4),
            (IN_PKTS, 4),
        ];
        let body_len = 4 + 4 + fields.len() * 4;
        buf.extend_from_slice(&0u16.to_be_bytes()); // flowset id 0
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());
        buf.extend_from_slice(&256u16.to_be_bytes()); // template id
        buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (code, len) in fields {
            buf.extend_from_slice(&code.to_be_bytes());
            buf.extend_from_slice(&len.to_be_bytes());
        }
        buf
    }

    /// Data flowset for template 256 carrying one record.
    pub(crate) fn data_packet(src: Ipv4Addr, dst: Ipv4Addr, bytes: u32, packets: u32) -> Vec<u8> {
        let mut buf = v9_header(1);
        buf.extend_from_slice(&256u16.to_be_bytes());
        buf.extend_from_slice(&20u16.to_be_bytes()); // 4 header + 16 record
        buf.extend_from_slice(&src.octets());
        buf.extend_from_slice(&dst.octets());
        buf.extend_from_slice(&bytes.to_be_bytes());
        buf.extend_from_slice(&packets.to_be_bytes());
        buf
    }

    #[test]
    fn template_then_data_decodes() {
        let mut cache = TemplateCache::default();

        let flows = parse_packet(&template_packet(), EXPORTER, &mut cache).unwrap();
        assert!(flows.is_empty());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(EXPORTER, 256).unwrap().fields.len(), 4);

        let data = data_packet(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6), 500, 3);
        let flows = parse_packet(&data, EXPORTER, &mut cache).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].src_address, "10.0.0.5");
        assert_eq!(flows[0].dst_address, "10.0.0.6");
        assert_eq!(flows[0].bytes, 500);
        assert_eq!(flows[0].packets, 3);
    }

    #[test]
    fn data_before_template_is_dropped() {
        let mut cache = TemplateCache::default();
        let data = data_packet(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6), 500, 3);
        let flows = parse_packet(&data, EXPORTER, &mut cache).unwrap();
        assert!(flows.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn templates_are_scoped_per_exporter() {
        let mut cache = TemplateCache::default();
        parse_packet(&template_packet(), EXPORTER, &mut cache).unwrap();

        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 77));
        let data = data_packet(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2), 10, 1);
        // Same template id from a different exporter: no decode.
        let flows = parse_packet(&data, other, &mut cache).unwrap();
        assert!(flows.is_empty());
    }

    #[test]
    fn template_resend_overwrites() {
        let mut cache = TemplateCache::default();
        parse_packet(&template_packet(), EXPORTER, &mut cache).unwrap();
        parse_packet(&template_packet(), EXPORTER, &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eight_byte_counters_are_accepted() {
        let mut cache = TemplateCache::default();
        cache.insert(
            EXPORTER,
            Template {
                template_id: 300,
                fields: vec![
                    TemplateField {
                        type_code: IN_BYTES,
                        length: 8,
                    },
                    TemplateField {
                        type_code: IN_PKTS,
                        length: 8,
                    },
                ],
            },
        );

        let mut buf = v9_header(1);
        buf.extend_from_slice(&300u16.to_be_bytes());
        buf.extend_from_slice(&20u16.to_be_bytes());
        buf.extend_from_slice(&(1u64 << 33).to_be_bytes());
        buf.extend_from_slice(&42u64.to_be_bytes());

        let flows = parse_packet(&buf, EXPORTER, &mut cache).unwrap();
        assert_eq!(flows[0].bytes, 1 << 33);
        assert_eq!(flows[0].packets, 42);
    }

    #[test]
    fn unknown_field_types_are_skipped_by_length() {
        let mut cache = TemplateCache::default();
        cache.insert(
            EXPORTER,
            Template {
                template_id: 301,
                fields: vec![
                    TemplateField {
                        type_code: 999,
                        length: 6,
                    },
                    TemplateField {
                        type_code: PROTOCOL,
                        length: 1,
                    },
                ],
            },
        );

        let mut buf = v9_header(1);
        buf.extend_from_slice(&301u16.to_be_bytes());
        buf.extend_from_slice(&11u16.to_be_bytes()); // 4 + 7
        buf.extend_from_slice(&[0xAA; 6]); // unknown field payload
        buf.push(17); // protocol

        let flows = parse_packet(&buf, EXPORTER, &mut cache).unwrap();
        assert_eq!(flows[0].protocol, 17);
    }

    #[test]
    fn switched_timestamps_rebase_to_epoch() {
        let mut cache = TemplateCache::default();
        cache.insert(
            EXPORTER,
            Template {
                template_id: 302,
                fields: vec![
                    TemplateField {
                        type_code: FIRST_SWITCHED,
                        length: 4,
                    },
                    TemplateField {
                        type_code: LAST_SWITCHED,
                        length: 4,
                    },
                ],
            },
        );

        let mut buf = v9_header(1);
        buf.extend_from_slice(&302u16.to_be_bytes());
        buf.extend_from_slice(&12u16.to_be_bytes());
        buf.extend_from_slice(&500u32.to_be_bytes()); // first
        buf.extend_from_slice(&900u32.to_be_bytes()); // last

        let flows = parse_packet(&buf, EXPORTER, &mut cache).unwrap();
        // header: uptime 1000, unix_secs 1_700_000_000
        assert_eq!(flows[0].start_time, 1_700_000_000_000 - 500);
        assert_eq!(flows[0].end_time, 1_700_000_000_000 - 100);
    }

    #[test]
    fn zero_length_single_byte_fields_do_not_panic() {
        // A hostile template can declare a zero-length PROTOCOL/TOS/
        // TCP_FLAGS field beside a real one; decoding must not panic.
        let mut cache = TemplateCache::default();
        cache.insert(
            EXPORTER,
            Template {
                template_id: 303,
                fields: vec![
                    TemplateField {
                        type_code: PROTOCOL,
                        length: 0,
                    },
                    TemplateField {
                        type_code: SRC_TOS,
                        length: 0,
                    },
                    TemplateField {
                        type_code: TCP_FLAGS,
                        length: 0,
                    },
                    TemplateField {
                        type_code: IN_BYTES,
                        length: 4,
                    },
                ],
            },
        );

        let mut buf = v9_header(1);
        buf.extend_from_slice(&303u16.to_be_bytes());
        buf.extend_from_slice(&8u16.to_be_bytes()); // 4 header + 4 record
        buf.extend_from_slice(&777u32.to_be_bytes());

        let flows = parse_packet(&buf, EXPORTER, &mut cache).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].bytes, 777);
        assert_eq!(flows[0].protocol, 0);
        assert_eq!(flows[0].tos, None);
        assert_eq!(flows[0].tcp_flags, None);
    }

    #[test]
    fn truncated_flowset_is_an_error() {
        let mut buf = v9_header(1);
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&200u16.to_be_bytes()); // claims 200 bytes
        buf.extend_from_slice(&[0u8; 4]);
        let mut cache = TemplateCache::default();
        assert!(matches!(
            parse_packet(&buf, EXPORTER, &mut cache),
            Err(ParseError::Truncated { .. })
        ));
    }
}
