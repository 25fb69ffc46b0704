//! IPv4 subnets the scanner is allowed to sweep

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ProbeError;

/// An IPv4 network in CIDR form, no wider than a /16
///
/// Every cycle probes each host address, so the prefix floor keeps a sweep
/// to at most 65534 targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    inner: Ipv4Network,
}

impl Subnet {
    /// Shortest prefix accepted anywhere a subnet enters the daemon
    pub const MIN_PREFIX_LEN: u8 = 16;

    /// Build a subnet, clearing any host bits in `addr`
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, ProbeError> {
        if prefix_len < Self::MIN_PREFIX_LEN {
            return Err(ProbeError::InvalidSubnet(format!(
                "/{} is wider than the /{} scan limit",
                prefix_len,
                Self::MIN_PREFIX_LEN
            )));
        }
        let net = Ipv4Network::new(addr, prefix_len)
            .map_err(|e| ProbeError::InvalidSubnet(e.to_string()))?;
        let inner = Ipv4Network::new(net.network(), prefix_len)
            .map_err(|e| ProbeError::InvalidSubnet(e.to_string()))?;
        Ok(Self { inner })
    }

    /// `192.168.1.0/24`, used when no subnet is configured or detected
    pub fn default_lan() -> Self {
        let addr = Ipv4Addr::new(192, 168, 1, 0);
        Self {
            inner: Ipv4Network::new(addr, 24).unwrap_or_else(|_| Ipv4Network::from(addr)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.inner.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.inner.prefix()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.inner.mask()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.inner.broadcast()
    }

    /// Check if IP is in this subnet
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.inner.contains(ip)
    }

    /// Usable host addresses; network and broadcast are skipped except on /31 and /32
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = self.network();
        let broadcast = self.broadcast();
        let skip_edges = self.prefix_len() < 31;
        self.inner
            .iter()
            .filter(move |ip| !skip_edges || (*ip != network && *ip != broadcast))
    }

    pub fn host_count(&self) -> usize {
        let size = 1u32 << (32 - u32::from(self.prefix_len()));
        match self.prefix_len() {
            31 | 32 => size as usize,
            _ => (size - 2) as usize,
        }
    }
}

impl FromStr for Subnet {
    type Err = ProbeError;

    /// Parse "192.168.1.0/24"; a bare address is a /32
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net = Ipv4Network::from_str(s.trim())
            .map_err(|e| ProbeError::InvalidSubnet(format!("{}: {}", s.trim(), e)))?;
        Self::new(net.ip(), net.prefix())
    }
}

impl TryFrom<String> for Subnet {
    type Error = ProbeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len())
    }
}
