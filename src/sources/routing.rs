//! Routing collection: OS route tables plus optional OSPF/BGP neighbor
//! state scraped from FRR's vtysh when requested.

use async_trait::async_trait;
use tracing::debug;

use super::exec::{run_command, run_optional_command};
use crate::collector::{SourceStrategy, Target, TargetSpec};
use crate::error::{CollectError, InitError};
use crate::net::prefix_to_netmask;
use crate::record::{
    RecordData, RouteEntry, RouteProtocol, RoutingNeighbor, RoutingProtocol, TelemetryRecord,
    TelemetrySource,
};

pub struct RoutingStrategy;

impl RoutingStrategy {
    pub fn new() -> Self {
        RoutingStrategy
    }

    async fn route_table(&self) -> Result<Vec<RouteEntry>, CollectError> {
        match std::env::consts::OS {
            "linux" => {
                let stdout = run_command("ip", &["route", "show"]).await?;
                Ok(parse_ip_route_output(&stdout))
            }
            "macos" | "freebsd" | "openbsd" | "netbsd" => {
                let stdout = run_command("netstat", &["-rn"]).await?;
                Ok(parse_netstat_output(&stdout))
            }
            "windows" => {
                let stdout = run_command("route", &["print"]).await?;
                Ok(parse_route_print_output(&stdout))
            }
            other => Err(CollectError::Other {
                reason: format!("no route-table command known for OS {other}"),
            }),
        }
    }

    /// Query vtysh for one protocol's neighbors. A missing vtysh binary
    /// is not an error, just an empty result.
    async fn protocol_neighbors(
        &self,
        protocol: RoutingProtocol,
    ) -> Result<Option<Vec<RoutingNeighbor>>, CollectError> {
        let vty_command = match protocol {
            RoutingProtocol::Ospf => "show ip ospf neighbor",
            RoutingProtocol::Bgp => "show ip bgp summary",
            // FRR has no neighbor view for RIP; nothing to scrape.
            RoutingProtocol::Rip => return Ok(None),
        };
        let Some(stdout) = run_optional_command("vtysh", &["-c", vty_command]).await? else {
            debug!(?protocol, "vtysh not present, skipping neighbor collection");
            return Ok(None);
        };
        let neighbors = match protocol {
            RoutingProtocol::Ospf => parse_ospf_neighbors(&stdout),
            RoutingProtocol::Bgp => parse_bgp_summary(&stdout),
            RoutingProtocol::Rip => unreachable!(),
        };
        Ok(Some(neighbors))
    }
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for RoutingStrategy {
    fn source(&self) -> TelemetrySource {
        TelemetrySource::Routing
    }

    async fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    async fn collect(&self, target: &Target) -> Result<Vec<TelemetryRecord>, CollectError> {
        let TargetSpec::Routing {
            collect_routes,
            collect_neighbors,
            protocols,
        } = &target.spec
        else {
            return Err(CollectError::BadTarget {
                id: target.id.clone(),
                reason: "not a routing target".into(),
            });
        };

        let mut records = Vec::new();
        if *collect_routes {
            let routes = self.route_table().await?;
            debug!(target = %target.id, routes = routes.len(), "collected route table");
            records.push(TelemetryRecord::new(
                TelemetrySource::Routing,
                "routing",
                RecordData::Routes { routes },
            ));
        }
        if *collect_neighbors {
            for protocol in protocols {
                if let Some(neighbors) = self.protocol_neighbors(*protocol).await? {
                    records.push(TelemetryRecord::new(
                        TelemetrySource::Routing,
                        "routing",
                        RecordData::RoutingNeighbors {
                            protocol: *protocol,
                            neighbors,
                        },
                    ));
                }
            }
        }
        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), CollectError> {
        Ok(())
    }
}

/// Destination token → (destination, netmask). `default` is
/// `0.0.0.0/0.0.0.0`; a bare address is a host route.
fn split_destination(dest: &str) -> Option<(String, String)> {
    if dest == "default" {
        return Some(("0.0.0.0".into(), "0.0.0.0".into()));
    }
    match dest.split_once('/') {
        Some((addr, prefix)) => {
            let addr = pad_partial_ipv4(addr)?;
            let prefix: u8 = prefix.parse().ok()?;
            if prefix > 32 {
                return None;
            }
            Some((addr, prefix_to_netmask(prefix).to_string()))
        }
        None => {
            dest.parse::<std::net::Ipv4Addr>().ok()?;
            Some((dest.to_string(), "255.255.255.255".into()))
        }
    }
}

/// BSD netstat truncates trailing zero octets (`10.0.0/24`).
fn pad_partial_ipv4(addr: &str) -> Option<String> {
    let parts: Vec<&str> = addr.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }
    for part in &parts {
        part.parse::<u8>().ok()?;
    }
    let mut octets = parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>();
    while octets.len() < 4 {
        octets.push("0".to_string());
    }
    Some(octets.join("."))
}

fn proto_token_to_protocol(token: &str) -> RouteProtocol {
    match token {
        "kernel" | "connected" => RouteProtocol::Connected,
        "static" | "boot" | "dhcp" => RouteProtocol::Static,
        "ospf" => RouteProtocol::Ospf,
        "bgp" => RouteProtocol::Bgp,
        "rip" => RouteProtocol::Rip,
        _ => RouteProtocol::Other,
    }
}

/// Linux `ip route show`:
/// `default via 10.0.0.1 dev eth0 proto static metric 100`
/// `10.0.0.0/24 dev eth0 proto kernel scope link src 10.0.0.5`
pub fn parse_ip_route_output(output: &str) -> Vec<RouteEntry> {
    output.lines().filter_map(parse_ip_route_line).collect()
}

fn parse_ip_route_line(line: &str) -> Option<RouteEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (destination, netmask) = split_destination(tokens.first()?)?;

    let mut gateway = "0.0.0.0".to_string();
    let mut interface = String::new();
    let mut metric = 0u32;
    let mut protocol = RouteProtocol::Connected;

    let mut iter = tokens[1..].iter();
    while let Some(token) = iter.next() {
        match *token {
            "via" => {
                if let Some(gw) = iter.next() {
                    gateway = gw.to_string();
                }
            }
            "dev" => {
                if let Some(dev) = iter.next() {
                    interface = dev.to_string();
                }
            }
            "proto" => {
                if let Some(proto) = iter.next() {
                    protocol = proto_token_to_protocol(proto);
                }
            }
            "metric" => {
                if let Some(m) = iter.next() {
                    metric = m.parse().unwrap_or(0);
                }
            }
            _ => {}
        }
    }

    Some(RouteEntry {
        destination,
        netmask,
        gateway,
        interface,
        metric,
        protocol,
        flags: None,
    })
}

/// BSD/macOS `netstat -rn` IPv4 section.
pub fn parse_netstat_output(output: &str) -> Vec<RouteEntry> {
    output.lines().filter_map(parse_netstat_line).collect()
}

fn parse_netstat_line(line: &str) -> Option<RouteEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let dest_token = if tokens[0] == "default" {
        "default"
    } else {
        tokens[0]
    };
    // Reject headers and IPv6 rows early.
    if dest_token != "default" && !dest_token.chars().next()?.is_ascii_digit() {
        return None;
    }
    if dest_token.contains(':') {
        return None;
    }
    let (destination, netmask) = split_destination(dest_token)?;

    let gateway_token = tokens[1];
    let flags = tokens[2].to_string();
    let interface = tokens[3].to_string();

    let (gateway, protocol) = if gateway_token.starts_with("link#") {
        ("0.0.0.0".to_string(), RouteProtocol::Connected)
    } else if gateway_token.parse::<std::net::Ipv4Addr>().is_ok() {
        let proto = if flags.contains('S') {
            RouteProtocol::Static
        } else {
            RouteProtocol::Other
        };
        (gateway_token.to_string(), proto)
    } else {
        return None;
    };

    Some(RouteEntry {
        destination,
        netmask,
        gateway,
        interface,
        metric: 0,
        protocol,
        flags: Some(flags),
    })
}

/// Windows `route print` IPv4 table: five-column rows.
pub fn parse_route_print_output(output: &str) -> Vec<RouteEntry> {
    output.lines().filter_map(parse_route_print_line).collect()
}

fn parse_route_print_line(line: &str) -> Option<RouteEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 5 {
        return None;
    }
    let destination = tokens[0].parse::<std::net::Ipv4Addr>().ok()?.to_string();
    let netmask = tokens[1].parse::<std::net::Ipv4Addr>().ok()?.to_string();
    let (gateway, protocol) = if tokens[2].eq_ignore_ascii_case("on-link") {
        ("0.0.0.0".to_string(), RouteProtocol::Connected)
    } else {
        (
            tokens[2].parse::<std::net::Ipv4Addr>().ok()?.to_string(),
            RouteProtocol::Other,
        )
    };
    let interface = tokens[3].to_string();
    let metric = tokens[4].parse().ok()?;

    Some(RouteEntry {
        destination,
        netmask,
        gateway,
        interface,
        metric,
        protocol,
        flags: None,
    })
}

/// FRR `show ip ospf neighbor` table rows:
/// `10.0.0.2  1  Full/DR  34.123s  10.0.0.2  eth0:10.0.0.1  0 0 0`
pub fn parse_ospf_neighbors(output: &str) -> Vec<RoutingNeighbor> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 6 {
                return None;
            }
            tokens[0].parse::<std::net::Ipv4Addr>().ok()?;
            tokens[1].parse::<u32>().ok()?;
            Some(RoutingNeighbor {
                address: tokens[4].to_string(),
                state: tokens[2].to_string(),
                neighbor_id: Some(tokens[0].to_string()),
                interface: Some(tokens[5].to_string()),
                remote_as: None,
            })
        })
        .collect()
}

/// FRR `show ip bgp summary` neighbor rows: the trailing column is a
/// prefix count once the session is Established, otherwise a state name.
pub fn parse_bgp_summary(output: &str) -> Vec<RoutingNeighbor> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 9 {
                return None;
            }
            tokens[0].parse::<std::net::Ipv4Addr>().ok()?;
            let remote_as = tokens[2].parse::<u32>().ok()?;
            let last = *tokens.last()?;
            let state = if last.parse::<u64>().is_ok() {
                "Established".to_string()
            } else {
                last.to_string()
            };
            Some(RoutingNeighbor {
                address: tokens[0].to_string(),
                state,
                neighbor_id: None,
                interface: None,
                remote_as: Some(remote_as),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn linux_routes_parse() {
        let output = indoc! {"
            default via 10.0.0.1 dev eth0 proto static metric 100
            10.0.0.0/24 dev eth0 proto kernel scope link src 10.0.0.5 metric 100
            192.168.50.4 via 10.0.0.1 dev eth0 proto ospf metric 20
        "};
        let routes = parse_ip_route_output(output);
        assert_eq!(routes.len(), 3);

        assert_eq!(
            routes[0],
            RouteEntry {
                destination: "0.0.0.0".into(),
                netmask: "0.0.0.0".into(),
                gateway: "10.0.0.1".into(),
                interface: "eth0".into(),
                metric: 100,
                protocol: RouteProtocol::Static,
                flags: None,
            }
        );

        assert_eq!(routes[1].destination, "10.0.0.0");
        assert_eq!(routes[1].netmask, "255.255.255.0");
        assert_eq!(routes[1].gateway, "0.0.0.0");
        assert_eq!(routes[1].protocol, RouteProtocol::Connected);

        assert_eq!(routes[2].destination, "192.168.50.4");
        assert_eq!(routes[2].netmask, "255.255.255.255");
        assert_eq!(routes[2].protocol, RouteProtocol::Ospf);
    }

    #[test]
    fn netstat_routes_parse() {
        let output = indoc! {"
            Routing tables

            Internet:
            Destination        Gateway            Flags        Netif Expire
            default            10.0.0.1           UGScg          en0
            10.0.0/24          link#4             UCS            en0
            10.0.0.99          10.0.0.1           UGHS           en0

            Internet6:
            default            fe80::1%en0        UGcg           en0
        "};
        let routes = parse_netstat_output(output);
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].destination, "0.0.0.0");
        assert_eq!(routes[0].gateway, "10.0.0.1");
        assert_eq!(routes[1].destination, "10.0.0.0");
        assert_eq!(routes[1].netmask, "255.255.255.0");
        assert_eq!(routes[1].protocol, RouteProtocol::Connected);
        assert_eq!(routes[2].protocol, RouteProtocol::Static);
        assert_eq!(routes[2].flags.as_deref(), Some("UGHS"));
    }

    #[test]
    fn route_print_rows_parse() {
        let output = indoc! {"
            IPv4 Route Table
            ===========================================================================
            Active Routes:
            Network Destination        Netmask          Gateway       Interface  Metric
                      0.0.0.0          0.0.0.0      192.168.1.1    192.168.1.7     25
                192.168.1.0    255.255.255.0         On-link     192.168.1.7    281
            ===========================================================================
        "};
        let routes = parse_route_print_output(output);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].gateway, "192.168.1.1");
        assert_eq!(routes[0].metric, 25);
        assert_eq!(routes[1].gateway, "0.0.0.0");
        assert_eq!(routes[1].protocol, RouteProtocol::Connected);
    }

    #[test]
    fn ospf_neighbor_rows_parse() {
        let output = indoc! {"
            Neighbor ID     Pri State           Dead Time Address         Interface            RXmtL RqstL DBsmL
            10.0.0.2          1 Full/DR           34.123s 10.0.0.2        eth0:10.0.0.1            0     0     0
            10.0.0.3          1 Full/Backup       31.001s 10.0.0.3        eth1:10.0.1.1            0     0     0
        "};
        let neighbors = parse_ospf_neighbors(output);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].neighbor_id.as_deref(), Some("10.0.0.2"));
        assert_eq!(neighbors[0].state, "Full/DR");
        assert_eq!(neighbors[0].interface.as_deref(), Some("eth0:10.0.0.1"));
    }

    #[test]
    fn bgp_summary_rows_parse() {
        let output = indoc! {"
            IPv4 Unicast Summary:
            BGP router identifier 10.0.0.1, local AS number 65000

            Neighbor        V         AS MsgRcvd MsgSent   TblVer  InQ OutQ  Up/Down State/PfxRcd
            10.0.0.2        4      65001     120     118        0    0    0 01:02:03            5
            10.0.0.3        4      65002       4       4        0    0    0    never       Active
        "};
        let neighbors = parse_bgp_summary(output);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].state, "Established");
        assert_eq!(neighbors[0].remote_as, Some(65001));
        assert_eq!(neighbors[1].state, "Active");
    }

    #[test]
    fn partial_ipv4_padding() {
        assert_eq!(pad_partial_ipv4("10.0.0").as_deref(), Some("10.0.0.0"));
        assert_eq!(pad_partial_ipv4("10").as_deref(), Some("10.0.0.0"));
        assert_eq!(pad_partial_ipv4("1.2.3.4").as_deref(), Some("1.2.3.4"));
        assert_eq!(pad_partial_ipv4("link#4"), None);
        assert_eq!(pad_partial_ipv4("10.0.0.0.0"), None);
    }

    #[tokio::test]
    async fn collect_rejects_foreign_targets() {
        let strategy = RoutingStrategy::new();
        let target = Target::new("0.0.0.0", TargetSpec::Listener).with_id("x");
        assert!(matches!(
            strategy.collect(&target).await.unwrap_err(),
            CollectError::BadTarget { .. }
        ));
    }
}
