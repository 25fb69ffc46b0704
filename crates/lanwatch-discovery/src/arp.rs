//! Link-layer resolution: raw ARP sweeps and the kernel neighbour table

use lanwatch_core::{Observation, ObservationMap, ProbeError, Subnet};
use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, MacAddr, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;

/// How often the receive loop wakes up to check its deadline
const READ_POLL: Duration = Duration::from_millis(100);

/// Broadcast an ARP request to every host in `subnet` and collect replies
pub async fn sweep(
    subnet: Subnet,
    interface: Option<String>,
    timeout: Duration,
) -> Result<ObservationMap, ProbeError> {
    tokio::task::spawn_blocking(move || sweep_blocking(subnet, interface.as_deref(), timeout))
        .await
        .map_err(|e| ProbeError::Join(e.to_string()))?
}

/// Resolve the MAC address of a single host
pub async fn resolve(
    ip: Ipv4Addr,
    interface: Option<String>,
    timeout: Duration,
) -> Result<Option<String>, ProbeError> {
    tokio::task::spawn_blocking(move || resolve_blocking(ip, interface.as_deref(), timeout))
        .await
        .map_err(|e| ProbeError::Join(e.to_string()))?
}

fn sweep_blocking(
    subnet: Subnet,
    interface: Option<&str>,
    timeout: Duration,
) -> Result<ObservationMap, ProbeError> {
    let mut link = LinkChannel::open(interface, subnet.network())?;
    let targets: Vec<Ipv4Addr> = subnet.hosts().filter(|ip| *ip != link.source_ip).collect();

    debug!(
        interface = %link.interface,
        subnet = %subnet,
        targets = targets.len(),
        "Starting ARP sweep"
    );

    for &target in &targets {
        link.request(target)?;
    }

    let mut found = ObservationMap::new();
    link.collect(timeout, |ip, mac| {
        if subnet.contains(ip) {
            found
                .entry(ip)
                .or_insert_with(|| Observation::with_mac(mac.to_string()));
        }
        false
    })?;

    debug!(subnet = %subnet, found = found.len(), "ARP sweep complete");
    Ok(found)
}

fn resolve_blocking(
    ip: Ipv4Addr,
    interface: Option<&str>,
    timeout: Duration,
) -> Result<Option<String>, ProbeError> {
    let mut link = LinkChannel::open(interface, ip)?;
    link.request(ip)?;

    let mut resolved = None;
    link.collect(timeout, |sender, mac| {
        if sender == ip {
            resolved = Some(mac.to_string());
            true
        } else {
            false
        }
    })?;
    trace!(ip = %ip, mac = ?resolved, "ARP resolve finished");
    Ok(resolved)
}

/// An open Ethernet channel on the interface facing a target network
struct LinkChannel {
    interface: String,
    source_mac: MacAddr,
    source_ip: Ipv4Addr,
    tx: Box<dyn DataLinkSender>,
    rx: Box<dyn DataLinkReceiver>,
}

impl LinkChannel {
    fn open(name: Option<&str>, target: Ipv4Addr) -> Result<Self, ProbeError> {
        let (iface, source_ip) = select_interface(datalink::interfaces(), name, target)?;
        let source_mac = iface
            .mac
            .ok_or_else(|| ProbeError::NoInterface(format!("{} has no hardware address", iface.name)))?;

        let config = datalink::Config {
            read_timeout: Some(READ_POLL),
            ..Default::default()
        };
        let (tx, rx) = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(ProbeError::Channel(format!(
                    "unsupported channel type on {}",
                    iface.name
                )))
            }
            Err(e) => return Err(ProbeError::from_io("opening datalink channel", e)),
        };

        Ok(Self {
            interface: iface.name,
            source_mac,
            source_ip,
            tx,
            rx,
        })
    }

    fn request(&mut self, target: Ipv4Addr) -> Result<(), ProbeError> {
        let frame = build_request(self.source_mac, self.source_ip, target)
            .ok_or_else(|| ProbeError::Channel("failed to build ARP frame".to_string()))?;
        match self.tx.send_to(&frame, None) {
            Some(Err(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(ProbeError::from_io("sending ARP request", e))
            }
            Some(Err(e)) => {
                trace!(target = %target, error = %e, "ARP request not sent");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Feed replies to `on_reply` until the timeout passes or it returns true
    fn collect<F>(&mut self, timeout: Duration, mut on_reply: F) -> Result<(), ProbeError>
    where
        F: FnMut(Ipv4Addr, MacAddr) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.rx.next() {
                Ok(frame) => {
                    if let Some((ip, mac)) = parse_reply(frame) {
                        if on_reply(ip, mac) {
                            return Ok(());
                        }
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => return Err(ProbeError::from_io("receiving ARP replies", e)),
            }
        }
        Ok(())
    }
}

/// Pick the interface to use: the named one, or the first up, non-loopback
/// interface whose IPv4 network contains `target`
fn select_interface(
    interfaces: Vec<NetworkInterface>,
    name: Option<&str>,
    target: Ipv4Addr,
) -> Result<(NetworkInterface, Ipv4Addr), ProbeError> {
    for iface in interfaces {
        if let Some(name) = name {
            if iface.name != name {
                continue;
            }
        } else if !iface.is_up() || iface.is_loopback() {
            continue;
        }

        let source = iface.ips.iter().find_map(|net| match net.ip() {
            IpAddr::V4(v4) if net.contains(IpAddr::V4(target)) => Some(v4),
            _ => None,
        });
        if let Some(source) = source {
            return Ok((iface, source));
        }
        if name.is_some() {
            return Err(ProbeError::NoInterface(format!(
                "{} has no IPv4 address facing {}",
                iface.name, target
            )));
        }
    }

    Err(ProbeError::NoInterface(match name {
        Some(name) => format!("interface {} not found", name),
        None => format!("no interface faces {}", target),
    }))
}

/// Build a broadcast Ethernet frame carrying an ARP who-has for `target`
fn build_request(source_mac: MacAddr, source_ip: Ipv4Addr, target: Ipv4Addr) -> Option<Vec<u8>> {
    let mut arp_buf = [0u8; ARP_PACKET_LEN];
    let mut arp = MutableArpPacket::new(&mut arp_buf)?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(source_mac);
    arp.set_sender_proto_addr(source_ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(target);

    let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
    {
        let mut ethernet = MutableEthernetPacket::new(&mut frame)?;
        ethernet.set_destination(MacAddr::broadcast());
        ethernet.set_source(source_mac);
        ethernet.set_ethertype(EtherTypes::Arp);
        ethernet.set_payload(arp.packet());
    }
    Some(frame)
}

/// Extract sender IP and MAC from an ARP reply frame
fn parse_reply(frame: &[u8]) -> Option<(Ipv4Addr, MacAddr)> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(ethernet.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }
    Some((arp.get_sender_proto_addr(), arp.get_sender_hw_addr()))
}

/// Kernel neighbour table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

/// Neighbour entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

/// Read the kernel neighbour table via `ip neigh show`
pub fn neighbour_table() -> Result<Vec<ArpEntry>, ProbeError> {
    let output = Command::new("ip")
        .args(["neigh", "show"])
        .output()
        .map_err(|e| ProbeError::from_io("running ip neigh", e))?;

    if !output.status.success() {
        return Err(ProbeError::Io(io::Error::other(format!(
            "ip neigh failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let entries: Vec<ArpEntry> = stdout.lines().filter_map(parse_ip_neigh_line).collect();
    debug!("Found {} neighbour entries", entries.len());
    Ok(entries)
}

/// MAC for `ip` from the neighbour table, when the kernel has one
pub fn neighbour_mac(ip: Ipv4Addr) -> Option<String> {
    match neighbour_table() {
        Ok(entries) => entries
            .into_iter()
            .find(|e| e.ip == ip && !e.mac.is_empty() && e.state != ArpState::Failed)
            .map(|e| e.mac),
        Err(e) => {
            warn!(error = %e, "Neighbour table unavailable");
            None
        }
    }
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    if dev_idx + 1 >= parts.len() {
        return None;
    }

    let interface = parts[dev_idx + 1].to_string();

    // MAC might not be present for INCOMPLETE entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = parts.last().map(|s| parse_arp_state(s)).unwrap_or(ArpState::Unknown);

    Some(ArpEntry { ip, mac, interface, state })
}

fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        _ => ArpState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::MutablePacket;

    fn reply_frame(sender_mac: MacAddr, sender_ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = build_request(sender_mac, sender_ip, Ipv4Addr::new(192, 168, 1, 2)).unwrap();
        let mut ethernet = MutableEthernetPacket::new(&mut frame).unwrap();
        let mut arp = MutableArpPacket::new(ethernet.payload_mut()).unwrap();
        arp.set_operation(ArpOperations::Reply);
        frame
    }

    #[test]
    fn test_build_request_layout() {
        let mac = MacAddr::new(0x02, 0, 0, 0, 0, 0x01);
        let frame = build_request(mac, Ipv4Addr::new(192, 168, 1, 2), Ipv4Addr::new(192, 168, 1, 10)).unwrap();
        assert_eq!(frame.len(), 42);

        let ethernet = EthernetPacket::new(&frame).unwrap();
        assert_eq!(ethernet.get_destination(), MacAddr::broadcast());
        assert_eq!(ethernet.get_ethertype(), EtherTypes::Arp);

        let arp = ArpPacket::new(ethernet.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_target_proto_addr(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(arp.get_sender_hw_addr(), mac);
    }

    #[test]
    fn test_parse_reply() {
        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
        let frame = reply_frame(mac, Ipv4Addr::new(192, 168, 1, 10));
        let (ip, parsed) = parse_reply(&frame).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(parsed.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_parse_reply_ignores_requests_and_short_frames() {
        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
        let request = build_request(mac, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)).unwrap();
        assert!(parse_reply(&request).is_none());
        assert!(parse_reply(&request[..10]).is_none());
    }

    #[test]
    fn test_select_interface_unknown_name() {
        let err = select_interface(Vec::new(), Some("nope0"), Ipv4Addr::new(10, 0, 0, 1)).unwrap_err();
        assert!(matches!(err, ProbeError::NoInterface(_)));
    }

    #[test]
    fn test_parse_ip_neigh_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Reachable);
    }

    #[test]
    fn test_parse_incomplete_line() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.mac, "");
        assert_eq!(entry.state, ArpState::Incomplete);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_ip_neigh_line("192.168.1.100 dev").is_none());
        assert!(parse_ip_neigh_line("fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE").is_none());
    }
}
