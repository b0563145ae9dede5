use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::DiscoveryError;

/// Largest range a single scan will enumerate (a /16).
pub const MAX_SCAN_HOSTS: u64 = 65_536;

/// An IPv4 network in CIDR notation. Host bits are masked off, so
/// `192.168.1.7/24` and `192.168.1.0/24` are the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, DiscoveryError> {
        if prefix > 32 {
            return Err(DiscoveryError::InvalidCidr(format!(
                "{address}/{prefix}: prefix must be at most 32"
            )));
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix));
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix))
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & mask(self.prefix) == u32::from(self.network)
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        match self.prefix {
            32 => 1,
            31 => 2,
            p => (1u64 << (32 - p)) - 2,
        }
    }

    /// Usable host addresses: network and broadcast are excluded for
    /// prefixes up to /30, a /31 yields both addresses and a /32 the
    /// single address.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let start = u32::from(self.network);
        let end = u32::from(self.broadcast());

        let (first, last) = match self.prefix {
            31 | 32 => (start, end),
            _ => (start + 1, end - 1),
        };

        (first..=last).map(Ipv4Addr::from)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DiscoveryError::InvalidCidr(s.to_string());

        let (address, prefix) = match s.split_once('/') {
            Some((address, prefix)) => (address, prefix.parse::<u8>().map_err(|_| invalid())?),
            None => (s, 32),
        };

        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        Self::new(address, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
