//! Application state management

use lanwatch_core::{DeviceView, Subnet};
use lanwatch_discovery::{DeviceRegistry, DiscoveryEvent, DiscoveryScanner, NetworkProbes};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Discovery scanner, owner of the device registry
    pub scanner: Arc<DiscoveryScanner>,
    /// Configuration as loaded at startup
    pub config: Config,
}

impl AppState {
    /// Load history and wire the network probes into a scanner
    pub fn new(config: Config, subnet: Subnet) -> Arc<Self> {
        let registry = Arc::new(DeviceRegistry::load(&config.daemon.history_path));
        let probes = Arc::new(NetworkProbes::new(config.discovery.probes.clone()));
        let scanner = Arc::new(DiscoveryScanner::new(
            config.to_scanner_config(subnet),
            probes,
            registry,
        ));
        Self::with_scanner(config, scanner)
    }

    pub fn with_scanner(config: Config, scanner: Arc<DiscoveryScanner>) -> Arc<Self> {
        Arc::new(Self { scanner, config })
    }

    pub async fn devices(&self) -> BTreeMap<Ipv4Addr, DeviceView> {
        self.scanner.devices().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.scanner.subscribe()
    }
}
