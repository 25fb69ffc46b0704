//! Multicast service discovery over mDNS-SD

use lanwatch_core::{Observation, ObservationMap, ProbeError};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Service types browsed when none are configured
pub const DEFAULT_SERVICES: &[&str] = &[
    "_http._tcp.local.",
    "_ipp._tcp.local.",
    "_ssh._tcp.local.",
    "_workstation._tcp.local.",
];

pub fn default_services() -> Vec<String> {
    DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()
}

/// One resolved service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
}

impl Advertisement {
    /// Lowest IPv4 address of the instance and its host name without the root dot
    pub fn from_info(info: &ServiceInfo) -> Option<Self> {
        let ip = info
            .get_addresses()
            .iter()
            .filter_map(|addr| match addr {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .min()?;
        let hostname = info.get_hostname().trim_end_matches('.');
        Some(Self {
            ip,
            hostname: (!hostname.is_empty()).then(|| hostname.to_string()),
        })
    }
}

/// Browse `services` for `window` and report every advertised IPv4 address
///
/// All service types are browsed concurrently against one shared deadline,
/// so the probe takes `window` regardless of how many types are listed.
pub async fn browse(services: &[String], window: Duration) -> Result<ObservationMap, ProbeError> {
    let daemon = ServiceDaemon::new().map_err(|e| ProbeError::Mdns(e.to_string()))?;
    let deadline = Instant::now() + window;
    let mut tasks = JoinSet::new();

    for (order, service) in services.iter().enumerate() {
        let receiver = match daemon.browse(service) {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!(service = %service, error = %e, "Failed to browse service type");
                continue;
            }
        };
        let service = service.clone();
        tasks.spawn(async move {
            let mut found = Vec::new();
            while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                if let ServiceEvent::ServiceResolved(info) = event {
                    trace!(service = %service, fullname = info.get_fullname(), "Service resolved");
                    found.extend(Advertisement::from_info(&info));
                }
            }
            (order, found)
        });
    }

    if tasks.is_empty() && !services.is_empty() {
        if let Err(e) = daemon.shutdown() {
            debug!(error = %e, "Failed to shut down mDNS daemon");
        }
        return Err(ProbeError::Mdns("no service type could be browsed".to_string()));
    }

    let mut batches = Vec::with_capacity(services.len());
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(batch) => batches.push(batch),
            Err(e) => warn!(error = %e, "mDNS browse task failed"),
        }
    }
    batches.sort_by_key(|(order, _)| *order);

    for service in services {
        if let Err(e) = daemon.stop_browse(service) {
            trace!(service = %service, error = %e, "Failed to stop browse");
        }
    }
    if let Err(e) = daemon.shutdown() {
        debug!(error = %e, "Failed to shut down mDNS daemon");
    }

    let observations = fold_advertisements(batches.into_iter().map(|(_, found)| found));
    debug!(found = observations.len(), "mDNS browse complete");
    Ok(observations)
}

/// Fold advertisements into one map; the first claim for an address wins
/// and later claims only fill a missing name
pub fn fold_advertisements<I>(batches: I) -> ObservationMap
where
    I: IntoIterator<Item = Vec<Advertisement>>,
{
    let mut observations = ObservationMap::new();
    for ad in batches.into_iter().flatten() {
        let entry = observations.entry(ad.ip).or_insert_with(Observation::bare);
        if entry.name.is_none() {
            entry.name = ad.hostname;
        }
    }
    observations
}
