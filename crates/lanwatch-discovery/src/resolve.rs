//! Reverse name resolution

use lanwatch_core::{NameOverlay, RegistryState};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::probes::ProbeSet;

/// Reverse lookups in flight at once
pub const DNS_WORKERS: usize = 32;

/// PTR lookup through the system resolver, bounded by `timeout`
///
/// The blocking resolver call holds one of `slots` until it returns, even
/// after the caller has given up on it, so the number of resolver threads
/// left behind by timeouts never exceeds the slot count.
pub async fn reverse_lookup(ip: Ipv4Addr, timeout: Duration, slots: Arc<Semaphore>) -> Option<String> {
    let lookup = async move {
        let slot = slots.acquire_owned().await.map_err(|e| e.to_string())?;
        let answer = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            dns_lookup::lookup_addr(&IpAddr::V4(ip))
        })
        .await
        .map_err(|e| e.to_string())?;
        Ok::<_, String>(answer)
    };

    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(name))) => clean_name(ip, &name),
        Ok(Ok(Err(e))) => {
            trace!(ip = %ip, error = %e, "Reverse lookup failed");
            None
        }
        Ok(Err(e)) => {
            debug!(ip = %ip, error = %e, "Reverse lookup task failed");
            None
        }
        Err(_) => {
            trace!(ip = %ip, "Reverse lookup timed out");
            None
        }
    }
}

/// Resolvers answer with the dotted address itself when no PTR record exists
fn clean_name(ip: Ipv4Addr, name: &str) -> Option<String> {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name == ip.to_string() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Build the name overlay for `addrs`: reverse lookup first, then the
/// last name history recorded for the address
///
/// Up to `DNS_WORKERS` lookups run at once. With each lookup cut off after
/// `dns_timeout`, resolving N addresses takes at most
/// `ceil(N / DNS_WORKERS) * dns_timeout`.
pub async fn resolve_names(probes: Arc<dyn ProbeSet>, addrs: &[Ipv4Addr], state: &RegistryState) -> NameOverlay {
    let permits = Arc::new(Semaphore::new(DNS_WORKERS));
    let mut tasks = JoinSet::new();

    for &ip in addrs {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let probes = probes.clone();
        tasks.spawn(async move {
            let _permit = permit;
            (ip, probes.reverse_name(ip).await)
        });
    }

    let mut resolved = BTreeMap::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((ip, Some(name))) => {
                resolved.insert(ip, name);
            }
            Ok((_, None)) => {}
            Err(e) => warn!(error = %e, "Reverse lookup task failed"),
        }
    }

    let mut overlay = NameOverlay::new();
    let mut from_history = 0;
    for &ip in addrs {
        if let Some(name) = resolved.remove(&ip) {
            overlay.insert(ip, name);
        } else if let Some(name) = state.known_name(ip) {
            overlay.insert(ip, name.to_string());
            from_history += 1;
        }
    }

    debug!(
        requested = addrs.len(),
        resolved = overlay.len() - from_history,
        from_history = from_history,
        "Reverse name resolution complete"
    );
    overlay
}
