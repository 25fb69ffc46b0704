//! Local IPv4 interfaces and subnet detection

use lanwatch_core::Subnet;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::warn;

/// Network interface info for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub subnet: Subnet,
}

/// Usable IPv4 interfaces, skipping loopback and container bridges
pub fn local_interfaces() -> Vec<LocalInterface> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to list network interfaces");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter_map(|iface| {
            iface.addr.iter().find_map(|addr| match addr {
                Addr::V4(v4) => {
                    let prefix = v4.netmask.map(|m| u32::from(m).count_ones() as u8).unwrap_or(24);
                    let subnet = Subnet::new(v4.ip, scan_prefix(prefix)).ok()?;
                    Some(LocalInterface {
                        name: iface.name.clone(),
                        ip: v4.ip,
                        subnet,
                    })
                }
                Addr::V6(_) => None,
            })
        })
        .filter(is_scannable)
        .collect()
}

/// Wide interface networks are narrowed to the block around the host address
fn scan_prefix(prefix: u8) -> u8 {
    prefix.max(Subnet::MIN_PREFIX_LEN)
}

fn is_scannable(iface: &LocalInterface) -> bool {
    !iface.name.starts_with("lo")
        && !iface.name.starts_with("docker")
        && !iface.name.starts_with("br-")
        && !iface.name.starts_with("veth")
        && !iface.ip.is_loopback()
        && !iface.ip.is_link_local()
}

/// Subnet of the first usable interface
pub fn detect_subnet() -> Option<Subnet> {
    local_interfaces().into_iter().next().map(|iface| iface.subnet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: &str) -> LocalInterface {
        let ip: Ipv4Addr = ip.parse().unwrap();
        LocalInterface {
            name: name.to_string(),
            ip,
            subnet: Subnet::new(ip, 24).unwrap(),
        }
    }

    #[test]
    fn test_is_scannable() {
        assert!(is_scannable(&iface("eth0", "192.168.1.5")));
        assert!(is_scannable(&iface("wlan0", "10.0.0.12")));
        assert!(!is_scannable(&iface("lo", "127.0.0.1")));
        assert!(!is_scannable(&iface("docker0", "172.17.0.1")));
        assert!(!is_scannable(&iface("veth12ab", "172.18.0.3")));
        assert!(!is_scannable(&iface("eth1", "169.254.10.1")));
    }

    #[test]
    fn test_wide_interface_network_is_narrowed() {
        assert_eq!(scan_prefix(8), 16);
        assert_eq!(scan_prefix(24), 24);
        let ip = Ipv4Addr::new(10, 42, 7, 3);
        assert_eq!(Subnet::new(ip, scan_prefix(8)).unwrap().to_string(), "10.42.0.0/16");
    }

    #[test]
    fn test_interface_subnet_is_network_address() {
        assert_eq!(iface("eth0", "192.168.1.5").subnet.to_string(), "192.168.1.0/24");
    }
}
