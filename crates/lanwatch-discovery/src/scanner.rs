//! Discovery scanner that runs the probes and reconciles their results

use chrono::Utc;
use lanwatch_core::{
    apply_names, merge_observations, reconcile, record_refresh, transitions, unnamed, DeviceStatus,
    DeviceView, ProbeOutcome, ReconcileOptions, Subnet,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::probes::ProbeSet;
use crate::registry::DeviceRegistry;
use crate::resolve::resolve_names;

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Subnet to sweep each cycle
    pub subnet: Subnet,
    /// Pause between the end of one cycle and the start of the next
    pub interval_secs: u64,
    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            subnet: Subnet::default_lan(),
            interval_secs: 10,
            reconcile: ReconcileOptions::default(),
        }
    }
}

/// Discovery event for real-time updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    ScanStarted,
    ScanCompleted { found: usize, total: usize },
    /// Address came online this cycle
    DeviceOnline(Ipv4Addr),
    /// Address was surfaced as offline this cycle
    DeviceOffline(Ipv4Addr),
    /// Address was refreshed on demand
    DeviceRefreshed(Ipv4Addr),
}

/// Result of one scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Addresses in this cycle's snapshot
    pub found: usize,
    /// Entries in the published live registry
    pub total: usize,
    pub online: usize,
    pub cycle: u64,
}

/// Answer to an on-demand refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    pub message: String,
}

impl RefreshOutcome {
    fn online(ip: Ipv4Addr) -> Self {
        Self {
            success: true,
            message: format!("Device {} is online", ip),
        }
    }

    fn offline(ip: Ipv4Addr) -> Self {
        Self {
            success: false,
            message: format!("Device {} is offline", ip),
        }
    }
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    config: Arc<RwLock<ScannerConfig>>,
    probes: Arc<dyn ProbeSet>,
    registry: Arc<DeviceRegistry>,
    scan_lock: Mutex<()>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryScanner {
    pub fn new(config: ScannerConfig, probes: Arc<dyn ProbeSet>, registry: Arc<DeviceRegistry>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config: Arc::new(RwLock::new(config)),
            probes,
            registry,
            scan_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// Update the scan subnet at runtime; takes effect on the next cycle
    pub async fn update_subnet(&self, subnet: Subnet) {
        let mut config = self.config.write().await;
        config.subnet = subnet;
        info!(subnet = %subnet, "Scan subnet updated");
    }

    pub async fn get_config(&self) -> ScannerConfig {
        self.config.read().await.clone()
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Current live devices joined with their timestamps
    pub async fn devices(&self) -> BTreeMap<Ipv4Addr, DeviceView> {
        self.registry.list_devices().await
    }

    /// Run one scan-merge-reconcile-persist cycle
    ///
    /// Cycles are serialized; a second caller waits for the running cycle to
    /// finish. Probe failures only shrink the snapshot.
    pub async fn scan_once(&self) -> ScanSummary {
        let _scan = self.scan_lock.lock().await;
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted);

        let config = self.config.read().await.clone();
        info!(subnet = %config.subnet, "Starting discovery scan");

        let link_layer = self.probes.link_layer_sweep(config.subnet).await;
        let known: BTreeSet<Ipv4Addr> = match &link_layer {
            ProbeOutcome::Success(map) => map.keys().copied().collect(),
            ProbeOutcome::Failure(_) => BTreeSet::new(),
        };
        let reachability = self.probes.reachability_sweep(config.subnet, &known).await;
        let multicast = self.probes.multicast_discovery().await;
        debug!(
            link_layer = link_layer.len(),
            reachability = reachability.len(),
            multicast = multicast.len(),
            "Probes finished"
        );

        let mut snapshot = merge_observations(link_layer, reachability, multicast);
        let current = self.registry.snapshot().await;
        let overlay = resolve_names(self.probes.clone(), &unnamed(&snapshot), &current).await;
        apply_names(&mut snapshot, &overlay);

        let found = snapshot.len();
        let now = Utc::now();
        let (prev, next) = self
            .registry
            .update(|prev| reconcile(prev, snapshot, now, &config.reconcile))
            .await;

        for transition in transitions(&prev.live, &next.live) {
            let event = match transition.status {
                DeviceStatus::Online => DiscoveryEvent::DeviceOnline(transition.ip),
                DeviceStatus::Offline => {
                    info!(ip = %transition.ip, "Device went offline");
                    DiscoveryEvent::DeviceOffline(transition.ip)
                }
            };
            let _ = self.event_tx.send(event);
        }

        let summary = ScanSummary {
            found,
            total: next.live.len(),
            online: next.online_count(),
            cycle: next.cycle,
        };
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            found: summary.found,
            total: summary.total,
        });

        info!(
            "Scan complete: {} devices found, {} total tracked",
            summary.found, summary.total
        );
        summary
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Discovery scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.scan_once() => {}
            }

            let interval = Duration::from_secs(self.config.read().await.interval_secs);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Discovery scheduler stopped");
    }

    /// Re-probe one address and record it if it answers
    ///
    /// Holds the cycle lock for the whole probe-and-record sequence, so a
    /// refresh lands either before a cycle starts probing or after it has
    /// published. An unreachable address leaves the registry untouched.
    pub async fn refresh_device(&self, ip: Ipv4Addr) -> RefreshOutcome {
        let _scan = self.scan_lock.lock().await;
        if !self.probes.is_reachable(ip).await {
            info!(ip = %ip, "Device unreachable on refresh");
            return RefreshOutcome::offline(ip);
        }

        let mac = self.probes.resolve_link_address(ip).await;
        let name = self.probes.reverse_name(ip).await;
        let options = self.config.read().await.reconcile;
        let now = Utc::now();

        self.registry
            .update(|prev| {
                let name = name.or_else(|| prev.known_name(ip).map(str::to_string));
                record_refresh(prev, ip, mac, name, now, &options)
            })
            .await;

        info!(ip = %ip, "Device refreshed");
        let _ = self.event_tx.send(DiscoveryEvent::DeviceRefreshed(ip));
        RefreshOutcome::online(ip)
    }
}
