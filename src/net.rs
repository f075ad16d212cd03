//! Small address-math helpers shared by the ARP, Routing, and SNMP
//! strategies: IPv4 CIDR arithmetic and MAC address canonicalization.

use std::net::Ipv4Addr;

use crate::error::ParseError;

/// An IPv4 CIDR block.
///
/// The mask for prefix `p` is `!((1 << (32 - p)) - 1)`, with `/0`
/// special-cased to an all-zero mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u32,
    prefix: u8,
}

impl Cidr {
    /// Parse `a.b.c.d/p` notation. The host bits of the address are
    /// masked off, so `10.0.0.5/24` denotes the `10.0.0.0/24` block.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (addr, prefix) = s.split_once('/').ok_or_else(|| ParseError::Malformed {
            field: "cidr",
            reason: format!("missing '/' in {s:?}"),
        })?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| ParseError::Malformed {
            field: "cidr",
            reason: format!("bad address in {s:?}"),
        })?;
        let prefix: u8 = prefix.parse().map_err(|_| ParseError::Malformed {
            field: "cidr",
            reason: format!("bad prefix in {s:?}"),
        })?;
        if prefix > 32 {
            return Err(ParseError::Malformed {
                field: "cidr",
                reason: format!("prefix {prefix} out of range"),
            });
        }
        let mask = prefix_to_mask(prefix);
        Ok(Cidr {
            network: u32::from(addr) & mask,
            prefix,
        })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn mask(&self) -> u32 {
        prefix_to_mask(self.prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Netmask in dotted-quad form, e.g. `255.255.255.0` for `/24`.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask())
    }

    /// Membership test: `ip & mask == network`.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == self.network
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

/// Mask for a prefix length. `/0` yields `0`.
pub fn prefix_to_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        !((1u32 << (32 - u32::from(prefix))) - 1)
    }
}

/// Dotted-quad netmask for a prefix length.
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    Ipv4Addr::from(prefix_to_mask(prefix))
}

/// Canonicalize a MAC address to `aa:bb:cc:dd:ee:ff`.
///
/// Accepts colon-, dash-, and space-separated pairs, Cisco dotted triplets
/// (`aabb.ccdd.eeff`), and bare 12-digit hex. Returns `None` when the
/// input does not contain exactly six hex octets. Idempotent on its own
/// output.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_lowercase();
    if hex.len() != 12 {
        return None;
    }
    // All-zero MACs show up for incomplete neighbor entries; callers
    // treat them the same as any other address.
    let mut out = String::with_capacity(17);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push(chunk[0] as char);
        out.push(chunk[1] as char);
    }
    Some(out)
}

/// Render raw MAC bytes as the canonical form. Returns `None` unless
/// exactly six bytes are given.
pub fn mac_from_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Whether a string is already in canonical MAC form.
pub fn is_canonical_mac(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts.iter().all(|p| {
            p.len() == 2
                && p.chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
}
