//! The set of probes a discovery cycle runs

use async_trait::async_trait;
use lanwatch_core::{ProbeKind, ProbeOutcome, Subnet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::ping::{Reachability, SystemPing};
use crate::{arp, mdns, ping, resolve};

/// Every discovery technique the scanner depends on
#[async_trait]
pub trait ProbeSet: Send + Sync {
    /// ARP sweep of the whole subnet
    async fn link_layer_sweep(&self, subnet: Subnet) -> ProbeOutcome;

    /// Reachability sweep of hosts the link-layer sweep did not find
    async fn reachability_sweep(&self, subnet: Subnet, known: &BTreeSet<Ipv4Addr>) -> ProbeOutcome;

    /// Listen for service advertisements for a fixed window
    async fn multicast_discovery(&self) -> ProbeOutcome;

    async fn reverse_name(&self, ip: Ipv4Addr) -> Option<String>;

    async fn is_reachable(&self, ip: Ipv4Addr) -> bool;

    /// Single-target link-layer resolution
    async fn resolve_link_address(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Probe tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Interface to send ARP on; chosen from the subnet when unset
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_arp_timeout_ms")]
    pub arp_timeout_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_ping_workers")]
    pub ping_workers: usize,
    #[serde(default = "default_mdns_window_ms")]
    pub mdns_window_ms: u64,
    #[serde(default = "mdns::default_services")]
    pub mdns_services: Vec<String>,
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
}

fn default_arp_timeout_ms() -> u64 {
    2000
}

fn default_ping_timeout_ms() -> u64 {
    500
}

fn default_ping_workers() -> usize {
    128
}

fn default_mdns_window_ms() -> u64 {
    3000
}

fn default_dns_timeout_ms() -> u64 {
    1000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interface: None,
            arp_timeout_ms: default_arp_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            ping_workers: default_ping_workers(),
            mdns_window_ms: default_mdns_window_ms(),
            mdns_services: mdns::default_services(),
            dns_timeout_ms: default_dns_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn arp_timeout(&self) -> Duration {
        Duration::from_millis(self.arp_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn mdns_window(&self) -> Duration {
        Duration::from_millis(self.mdns_window_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }
}

/// Probes backed by the real network
pub struct NetworkProbes {
    config: ProbeConfig,
    pinger: Arc<dyn Reachability>,
    /// Caps resolver threads across cycles, including abandoned lookups
    dns_slots: Arc<Semaphore>,
}

impl NetworkProbes {
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_pinger(config, Arc::new(SystemPing))
    }

    pub fn with_pinger(config: ProbeConfig, pinger: Arc<dyn Reachability>) -> Self {
        Self {
            config,
            pinger,
            dns_slots: Arc::new(Semaphore::new(resolve::DNS_WORKERS)),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

#[async_trait]
impl ProbeSet for NetworkProbes {
    async fn link_layer_sweep(&self, subnet: Subnet) -> ProbeOutcome {
        let result = arp::sweep(subnet, self.config.interface.clone(), self.config.arp_timeout()).await;
        ProbeOutcome::from_result(ProbeKind::LinkLayer, result)
    }

    async fn reachability_sweep(&self, subnet: Subnet, known: &BTreeSet<Ipv4Addr>) -> ProbeOutcome {
        let result = ping::sweep(
            self.pinger.clone(),
            subnet,
            known,
            self.config.ping_workers,
            self.config.ping_timeout(),
        )
        .await;
        ProbeOutcome::from_result(ProbeKind::Reachability, result)
    }

    async fn multicast_discovery(&self) -> ProbeOutcome {
        let result = mdns::browse(&self.config.mdns_services, self.config.mdns_window()).await;
        ProbeOutcome::from_result(ProbeKind::Multicast, result)
    }

    async fn reverse_name(&self, ip: Ipv4Addr) -> Option<String> {
        resolve::reverse_lookup(ip, self.config.dns_timeout(), self.dns_slots.clone()).await
    }

    async fn is_reachable(&self, ip: Ipv4Addr) -> bool {
        let timeout = self.config.ping_timeout();
        tokio::time::timeout(timeout, self.pinger.is_reachable(ip, timeout))
            .await
            .unwrap_or(false)
    }

    /// Raw ARP first, then whatever the kernel learned from the echo request
    async fn resolve_link_address(&self, ip: Ipv4Addr) -> Option<String> {
        match arp::resolve(ip, self.config.interface.clone(), self.config.arp_timeout()).await {
            Ok(Some(mac)) => return Some(mac),
            Ok(None) => debug!(ip = %ip, "No ARP reply"),
            Err(e) => debug!(ip = %ip, error = %e, "ARP resolve unavailable, using neighbour table"),
        }
        tokio::task::spawn_blocking(move || arp::neighbour_mac(ip))
            .await
            .ok()
            .flatten()
    }
}
