//! Merge engine: folds the per-probe partial maps into one snapshot
//!
//! Precedence is fixed: link-layer first, then reachability, then multicast,
//! and finally the reverse-name overlay. A technique never replaces a field
//! an earlier technique already filled, so the link-layer MAC always wins.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::device::{Observation, Snapshot, SnapshotEntry};
use crate::probe::ProbeOutcome;

/// Names learned by reverse resolution, keyed by address
pub type NameOverlay = BTreeMap<Ipv4Addr, String>;

/// Steps 1-3: seed from link-layer, then add reachability and multicast
pub fn merge_observations(
    link_layer: ProbeOutcome,
    reachability: ProbeOutcome,
    multicast: ProbeOutcome,
) -> Snapshot {
    let mut snapshot = Snapshot::new();

    for (ip, observation) in link_layer.into_observations() {
        snapshot.insert(ip, SnapshotEntry::online(observation));
    }
    let seeded = snapshot.len();

    for (ip, observation) in reachability.into_observations() {
        snapshot
            .entry(ip)
            .or_insert_with(|| SnapshotEntry::online(observation));
    }
    let reachable = snapshot.len() - seeded;

    let mut multicast_new = 0;
    for (ip, observation) in multicast.into_observations() {
        match snapshot.get_mut(&ip) {
            Some(existing) => fill_missing(existing, observation),
            None => {
                snapshot.insert(ip, SnapshotEntry::online(observation));
                multicast_new += 1;
            }
        }
    }

    debug!(
        link_layer = seeded,
        reachability = reachable,
        multicast = multicast_new,
        "Merged probe results"
    );
    snapshot
}

/// Fill absent fields only; a present MAC or name is never replaced
fn fill_missing(entry: &mut SnapshotEntry, observation: Observation) {
    if entry.mac.is_none() {
        entry.mac = observation.mac;
    }
    if entry.name.is_none() {
        entry.name = observation.name;
    }
}

/// Addresses that still lack a name and need reverse resolution
pub fn unnamed(snapshot: &Snapshot) -> Vec<Ipv4Addr> {
    snapshot
        .iter()
        .filter(|(_, entry)| entry.name.is_none())
        .map(|(ip, _)| *ip)
        .collect()
}

/// Step 4: fill names still unknown from the reverse-resolution overlay
pub fn apply_names(snapshot: &mut Snapshot, overlay: &NameOverlay) {
    for (ip, entry) in snapshot.iter_mut() {
        if entry.name.is_none() {
            if let Some(name) = overlay.get(ip) {
                entry.name = Some(name.clone());
            }
        }
    }
}
