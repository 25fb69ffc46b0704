//! Reachability sweep with a bounded worker pool

use async_trait::async_trait;
use lanwatch_core::{Observation, ObservationMap, ProbeError, Subnet};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// A liveness check for a single address
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> bool;
}

/// Runs the platform `ping` binary once per address
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

#[async_trait]
impl Reachability for SystemPing {
    async fn is_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let result = tokio::process::Command::new("ping")
            .args(ping_args(ip, timeout))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match result {
            Ok(status) => status.success(),
            Err(e) => {
                trace!(ip = %ip, error = %e, "Failed to run ping");
                false
            }
        }
    }
}

/// Arguments for a single echo request; Unix `-W` takes whole seconds
fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let ms = timeout.as_millis().max(1);
    if cfg!(windows) {
        vec!["-n".into(), "1".into(), "-w".into(), ms.to_string(), ip.to_string()]
    } else {
        let secs = (ms / 1000).max(1);
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), ip.to_string()]
    }
}

/// Probe every host in `subnet` not already in `known`
///
/// At most `workers` probes run at once and each is cut off after `timeout`,
/// so a sweep of N hosts takes at most `ceil(N / workers) * timeout`. The
/// result depends only on which probes succeeded, not on completion order.
pub async fn sweep(
    prober: Arc<dyn Reachability>,
    subnet: Subnet,
    known: &BTreeSet<Ipv4Addr>,
    workers: usize,
    timeout: Duration,
) -> Result<ObservationMap, ProbeError> {
    let hosts: Vec<Ipv4Addr> = subnet.hosts().filter(|ip| !known.contains(ip)).collect();
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    debug!(
        subnet = %subnet,
        hosts = hosts.len(),
        workers = workers,
        "Starting reachability sweep"
    );

    for host in hosts {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ProbeError::Join(e.to_string()))?;
        let prober = prober.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let alive = tokio::time::timeout(timeout, prober.is_reachable(host, timeout))
                .await
                .unwrap_or(false);
            (host, alive)
        });
    }

    let mut reachable = ObservationMap::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((host, true)) => {
                reachable.insert(host, Observation::bare());
            }
            Ok((_, false)) => {}
            Err(e) => warn!(error = %e, "Reachability task failed"),
        }
    }

    debug!(subnet = %subnet, found = reachable.len(), "Reachability sweep complete");
    Ok(reachable)
}
