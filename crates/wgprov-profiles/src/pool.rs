//! IPv4 Address Pool
//!
//! Selects the next free host address from a CIDR block. Pure functions
//! only, so allocation is safe to run inside a database transaction.
//!
//! Reserved addresses never handed out:
//! - the network address itself
//! - the broadcast address
//! - the gateway (network address + 1)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation (e.g. `10.0.0.0/24`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Create from a network address and prefix length
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self, PoolError> {
        if prefix > 32 {
            return Err(PoolError::InvalidCidr(format!("/{prefix}")));
        }
        let masked = Ipv4Addr::from(u32::from(network) & Self::mask(prefix));
        Ok(Self {
            network: masked,
            prefix,
        })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    /// Network address (all host bits zero)
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Broadcast address (all host bits one)
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask(self.prefix))
    }

    /// The reserved gateway address: network + 1
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network).saturating_add(1))
    }

    /// Whether `addr` is a usable host address of this block
    pub fn contains_host(&self, addr: Ipv4Addr) -> bool {
        let a = u32::from(addr);
        a > u32::from(self.network) && a < u32::from(self.broadcast())
    }

    /// Iterate host addresses in ascending order, network and broadcast
    /// excluded. Prefixes of /31 and longer have no allocatable hosts.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network).saturating_add(1);
        let last = u32::from(self.broadcast());
        let range = if self.prefix >= 31 { 1..1 } else { first..last };
        range.map(Ipv4Addr::from)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| PoolError::InvalidCidr(s.to_string()))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| PoolError::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| PoolError::InvalidCidr(s.to_string()))?;
        Self::new(network, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = PoolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

/// Return the first host address of `cidr` not present in `used`.
///
/// Walks host addresses in ascending numeric order and skips the
/// reserved gateway address.
pub fn allocate(cidr: &Ipv4Cidr, used: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, PoolError> {
    let gateway = cidr.gateway();

    cidr.hosts()
        .filter(|host| *host != gateway)
        .find(|host| !used.contains(host))
        .ok_or(PoolError::Exhausted)
}

/// Address pool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("No free IP addresses available in pool")]
    Exhausted,

    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_parse() {
        let net = cidr("10.0.0.0/24");
        assert_eq!(net.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(net.prefix(), 24);
        assert_eq!(net.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(net.gateway(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_cidr_parse_masks_host_bits() {
        let net = cidr("10.0.0.17/24");
        assert_eq!(net.network(), Ipv4Addr::new(10, 0, 0, 0));
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("banana/24".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_allocate_skips_gateway() {
        let net = cidr("10.0.0.0/24");
        let ip = allocate(&net, &HashSet::new()).unwrap();

        // .1 is the gateway, so the first free host is .2
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_allocate_first_free() {
        let net = cidr("10.0.0.0/24");
        let used: HashSet<Ipv4Addr> = [Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)]
            .into_iter()
            .collect();

        assert_eq!(allocate(&net, &used).unwrap(), Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn test_allocate_fills_gaps() {
        let net = cidr("10.0.0.0/24");
        let used: HashSet<Ipv4Addr> = [Ipv4Addr::new(10, 0, 0, 3)].into_iter().collect();

        assert_eq!(allocate(&net, &used).unwrap(), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_allocate_exhausted() {
        let net = cidr("10.0.0.0/30");
        // Hosts are .1 (gateway, reserved) and .2
        let mut used = HashSet::new();
        assert_eq!(allocate(&net, &used).unwrap(), Ipv4Addr::new(10, 0, 0, 2));

        used.insert(Ipv4Addr::new(10, 0, 0, 2));
        assert!(matches!(allocate(&net, &used), Err(PoolError::Exhausted)));
    }

    #[test]
    fn test_allocate_full_24() {
        let net = cidr("10.0.0.0/24");
        let used: HashSet<Ipv4Addr> = net.hosts().collect();

        assert!(matches!(allocate(&net, &used), Err(PoolError::Exhausted)));
    }

    #[test]
    fn test_tiny_prefixes_have_no_hosts() {
        assert!(matches!(
            allocate(&cidr("10.0.0.0/31"), &HashSet::new()),
            Err(PoolError::Exhausted)
        ));
        assert!(matches!(
            allocate(&cidr("10.0.0.0/32"), &HashSet::new()),
            Err(PoolError::Exhausted)
        ));
    }

    #[test]
    fn test_top_of_address_space() {
        // network + 1 must not wrap past 255.255.255.255
        let net = cidr("255.255.255.255/32");
        assert_eq!(net.gateway(), Ipv4Addr::new(255, 255, 255, 255));
        assert!(matches!(
            allocate(&net, &HashSet::new()),
            Err(PoolError::Exhausted)
        ));
    }

    #[test]
    fn test_contains_host() {
        let net = cidr("10.0.0.0/24");
        assert!(net.contains_host(Ipv4Addr::new(10, 0, 0, 42)));
        assert!(!net.contains_host(Ipv4Addr::new(10, 0, 0, 0)));
        assert!(!net.contains_host(Ipv4Addr::new(10, 0, 0, 255)));
        assert!(!net.contains_host(Ipv4Addr::new(10, 0, 1, 1)));
    }
}
