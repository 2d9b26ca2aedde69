//! Bound address model and prefix arithmetic.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("unknown transport \"{0}\" (expected udp or tcp)")]
    Transport(String),
    #[error("invalid address \"{0}\"")]
    Address(String),
    #[error("prefix /{prefix} is too long for {family}")]
    Prefix { prefix: u8, family: Family },
}

/// Transport protocol a listener binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for Transport {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Transport::Udp),
            "tcp" => Ok(Transport::Tcp),
            _ => Err(AddressError::Transport(s.to_string())),
        }
    }
}

/// Address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn bits(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

/// The coverage a listener claims: transport, port and an address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundAddress {
    transport: Transport,
    port: u16,
    ip: IpAddr,
    prefix: u8,
    scope_id: Option<u32>,
}

impl BoundAddress {
    /// A single host address (full-length prefix).
    pub fn new(transport: Transport, ip: IpAddr, port: u16) -> Self {
        let prefix = family_of(&ip).bits();
        Self {
            transport,
            port,
            ip,
            prefix,
            scope_id: None,
        }
    }

    /// The `/0` wildcard for `family`.
    pub fn wildcard(transport: Transport, family: Family, port: u16) -> Self {
        let ip = match family {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self {
            transport,
            port,
            ip,
            prefix: 0,
            scope_id: None,
        }
    }

    /// Parse `addr[/prefix]`; `*` means the IPv4 wildcard.
    pub fn parse(transport: Transport, spec: &str, port: u16) -> Result<Self, AddressError> {
        let spec = spec.trim();
        if spec == "*" {
            return Ok(Self::wildcard(transport, Family::V4, port));
        }

        let (addr, prefix) = match spec.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| AddressError::Address(spec.to_string()))?;
                (addr, Some(prefix))
            }
            None => (spec, None),
        };
        let ip = IpAddr::from_str(addr).map_err(|_| AddressError::Address(spec.to_string()))?;

        let bound = Self::new(transport, ip, port);
        match prefix {
            Some(prefix) => bound.with_prefix(prefix),
            None => Ok(bound),
        }
    }

    /// Narrow or widen the covered range. Host bits are masked off.
    pub fn with_prefix(mut self, prefix: u8) -> Result<Self, AddressError> {
        let family = self.family();
        if prefix > family.bits() {
            return Err(AddressError::Prefix { prefix, family });
        }
        self.prefix = prefix;
        self.ip = from_bits(family, mask(self.bits(), prefix, family));
        Ok(self)
    }

    pub fn with_scope(mut self, scope_id: u32) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn scope_id(&self) -> Option<u32> {
        self.scope_id
    }

    pub fn family(&self) -> Family {
        family_of(&self.ip)
    }

    /// Address to hand to `bind()`. Host records bind their address,
    /// anything wider binds the unspecified address of the family.
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = if self.prefix == self.family().bits() {
            self.ip
        } else {
            from_bits(self.family(), 0)
        };
        match (ip, self.scope_id) {
            (IpAddr::V6(ip), Some(scope)) => {
                SocketAddr::V6(std::net::SocketAddrV6::new(ip, self.port, 0, scope))
            }
            (ip, _) => SocketAddr::new(ip, self.port),
        }
    }

    /// Address bits, right aligned (IPv4 lives in the low 32 bits).
    pub(crate) fn bits(&self) -> u128 {
        match self.ip {
            IpAddr::V4(ip) => u32::from(ip) as u128,
            IpAddr::V6(ip) => u128::from(ip),
        }
    }

    /// Address bits masked to this record's own prefix.
    pub(crate) fn network(&self) -> u128 {
        mask(self.bits(), self.prefix, self.family())
    }

    /// Address bits masked to `prefix`.
    pub(crate) fn network_at(&self, prefix: u8) -> u128 {
        mask(self.bits(), prefix, self.family())
    }

    /// Last address covered by the prefix.
    pub(crate) fn broadcast(&self) -> u128 {
        let family = self.family();
        self.network() | (!mask(u128::MAX, self.prefix, family) & width_mask(family))
    }

    /// Total order used by the conflict index. Two records compare
    /// `Equal` exactly when their coverage overlaps.
    pub fn conflict_cmp(&self, other: &Self) -> Ordering {
        self.transport
            .cmp(&other.transport)
            .then(self.port.cmp(&other.port))
            .then(self.family().cmp(&other.family()))
            .then_with(|| match (self.scope_id, other.scope_id) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            })
            .then_with(|| {
                let shortest = self.prefix.min(other.prefix);
                self.network_at(shortest).cmp(&other.network_at(shortest))
            })
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.conflict_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{} port {}", self.transport, self.ip, self.prefix, self.port)?;
        if let Some(scope) = self.scope_id {
            write!(f, " scope {}", scope)?;
        }
        Ok(())
    }
}

fn family_of(ip: &IpAddr) -> Family {
    match ip {
        IpAddr::V4(_) => Family::V4,
        IpAddr::V6(_) => Family::V6,
    }
}

fn width_mask(family: Family) -> u128 {
    match family {
        Family::V4 => u32::MAX as u128,
        Family::V6 => u128::MAX,
    }
}

fn mask(bits: u128, prefix: u8, family: Family) -> u128 {
    if prefix == 0 {
        return 0;
    }
    let width = family.bits();
    let keep = width_mask(family) & (u128::MAX << (width - prefix.min(width)));
    bits & keep
}

fn from_bits(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp(spec: &str, port: u16) -> BoundAddress {
        BoundAddress::parse(Transport::Udp, spec, port).unwrap()
    }

    #[test]
    fn test_parse() {
        let a = udp("10.0.0.5/24", 1812);
        assert_eq!(a.ip(), "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(a.prefix(), 24);

        let host = udp("192.168.1.1", 1812);
        assert_eq!(host.prefix(), 32);

        let any = udp("*", 1812);
        assert_eq!(any.prefix(), 0);

        assert!(BoundAddress::parse(Transport::Udp, "10.0.0.1/33", 1).is_err());
        assert!(BoundAddress::parse(Transport::Udp, "nope", 1).is_err());
        assert_eq!("TCP".parse::<Transport>().unwrap(), Transport::Tcp);
    }

    #[test]
    fn test_wildcard_contains_host() {
        let any = BoundAddress::wildcard(Transport::Udp, Family::V4, 1812);
        let host = udp("10.0.0.5", 1812);
        assert!(any.overlaps(&host));
        assert!(host.overlaps(&any));
    }

    #[test]
    fn test_disjoint_prefixes() {
        let a = udp("10.0.0.0/24", 1812);
        let b = udp("10.0.1.0/24", 1812);
        assert!(!a.overlaps(&b));
        assert_eq!(a.conflict_cmp(&b), Ordering::Less);
        assert_eq!(b.conflict_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_ordering_precedence() {
        let udp_a = udp("10.0.0.0/24", 1812);
        let tcp_a = BoundAddress::parse(Transport::Tcp, "10.0.0.0/24", 1812).unwrap();
        assert!(!udp_a.overlaps(&tcp_a));

        let other_port = udp("10.0.0.0/24", 1813);
        assert!(!udp_a.overlaps(&other_port));

        let v6 = udp("::/0", 1812);
        assert!(!udp_a.overlaps(&v6));
    }

    #[test]
    fn test_scope_only_when_both_set() {
        let a = udp("fe80::1", 1812).with_scope(2);
        let b = udp("fe80::1", 1812).with_scope(3);
        let unscoped = udp("fe80::1", 1812);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&unscoped));
    }

    #[test]
    fn test_broadcast() {
        let a = udp("10.0.0.0/24", 1);
        assert_eq!(a.broadcast(), u32::from(Ipv4Addr::new(10, 0, 0, 255)) as u128);
        let any = udp("*", 1);
        assert_eq!(any.broadcast(), u32::MAX as u128);
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(udp("127.0.0.1", 1812).socket_addr(), "127.0.0.1:1812".parse().unwrap());
        assert_eq!(udp("10.0.0.0/8", 1812).socket_addr(), "0.0.0.0:1812".parse().unwrap());
        assert_eq!(udp("::/0", 1813).socket_addr(), "[::]:1813".parse().unwrap());
    }
}
