//! Reconciliation engine: derives the next registry state from a snapshot
//!
//! `reconcile` is a pure function of the previous state, the new snapshot and
//! the current time. The store publishes its result as one value, so readers
//! never see a registry assembled from two cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::device::{DeviceStatus, DeviceView, IdentityRecord, Snapshot, SnapshotEntry};

/// How absent, historically known addresses appear in the live registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Surface an address as offline on the cycle it disappears, then omit it
    /// until it comes back. Every known address is surfaced once after startup.
    #[default]
    SurfaceOnce,
    /// Surface every known address every cycle
    AlwaysSurface,
}

/// Whether history keeps the first identity seen or follows later observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    #[default]
    KeepFirst,
    /// Overwrite name/MAC with newer non-empty values; `first_seen` is kept
    TrackLatest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    #[serde(default)]
    pub offline_policy: OfflinePolicy,
    #[serde(default)]
    pub identity_policy: IdentityPolicy,
}

/// Everything the registry knows at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryState {
    /// What is true right now, replaced wholesale each cycle
    pub live: Snapshot,
    /// Identity of every address ever observed; entries are never removed
    pub history: BTreeMap<Ipv4Addr, IdentityRecord>,
    /// When each address was last observed online
    pub last_seen: BTreeMap<Ipv4Addr, DateTime<Utc>>,
    /// Completed reconciliations since the process started
    pub cycle: u64,
}

impl RegistryState {
    /// Start from persisted history with an empty live view
    pub fn from_history(
        history: BTreeMap<Ipv4Addr, IdentityRecord>,
        last_seen: BTreeMap<Ipv4Addr, DateTime<Utc>>,
    ) -> Self {
        Self {
            live: Snapshot::new(),
            history,
            last_seen,
            cycle: 0,
        }
    }

    /// Join the live view with last-seen and first-seen times
    pub fn list_devices(&self) -> BTreeMap<Ipv4Addr, DeviceView> {
        self.live
            .iter()
            .map(|(ip, entry)| (*ip, self.view(ip, entry)))
            .collect()
    }

    /// Get a single live device
    pub fn device(&self, ip: Ipv4Addr) -> Option<DeviceView> {
        self.live.get(&ip).map(|entry| self.view(&ip, entry))
    }

    fn view(&self, ip: &Ipv4Addr, entry: &SnapshotEntry) -> DeviceView {
        DeviceView {
            mac: entry.mac.clone(),
            name: entry.name.clone(),
            status: entry.status,
            last_seen: self.last_seen.get(ip).copied(),
            first_seen: self.history.get(ip).map(|r| r.first_seen),
        }
    }

    pub fn online_count(&self) -> usize {
        self.live.values().filter(|e| e.is_online()).count()
    }

    /// Last known name for an address, used when reverse resolution fails
    pub fn known_name(&self, ip: Ipv4Addr) -> Option<&str> {
        self.history.get(&ip).and_then(|r| r.name.as_deref())
    }
}

/// Compute the next registry state from this cycle's snapshot
pub fn reconcile(
    prev: &RegistryState,
    snapshot: Snapshot,
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> RegistryState {
    let mut history = prev.history.clone();
    let mut last_seen = prev.last_seen.clone();
    let mut live = Snapshot::new();

    for (ip, mut entry) in snapshot {
        record_identity(&mut history, ip, &entry, now, options.identity_policy);
        last_seen.insert(ip, now);
        entry.status = DeviceStatus::Online;
        live.insert(ip, entry);
    }

    for (ip, record) in &history {
        if live.contains_key(ip) {
            continue;
        }
        let surface = match options.offline_policy {
            OfflinePolicy::AlwaysSurface => true,
            OfflinePolicy::SurfaceOnce => prev
                .live
                .get(ip)
                .map(|e| e.is_online())
                .unwrap_or(prev.cycle == 0),
        };
        if surface {
            live.insert(*ip, record.to_offline_entry());
        }
    }

    RegistryState {
        live,
        history,
        last_seen,
        cycle: prev.cycle + 1,
    }
}

/// Single-address update used by on-demand refresh
pub fn record_refresh(
    prev: &RegistryState,
    ip: Ipv4Addr,
    mac: Option<String>,
    name: Option<String>,
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> RegistryState {
    let mut next = prev.clone();
    let entry = SnapshotEntry {
        mac,
        name,
        status: DeviceStatus::Online,
    };
    record_identity(&mut next.history, ip, &entry, now, options.identity_policy);
    next.last_seen.insert(ip, now);
    next.live.insert(ip, entry);
    next
}

fn record_identity(
    history: &mut BTreeMap<Ipv4Addr, IdentityRecord>,
    ip: Ipv4Addr,
    entry: &SnapshotEntry,
    now: DateTime<Utc>,
    policy: IdentityPolicy,
) {
    match history.entry(ip) {
        Entry::Vacant(slot) => {
            slot.insert(IdentityRecord::new(entry.mac.clone(), entry.name.clone(), now));
        }
        Entry::Occupied(mut slot) => {
            if policy == IdentityPolicy::TrackLatest {
                let record = slot.get_mut();
                if entry.mac.is_some() {
                    record.mac = entry.mac.clone();
                }
                if entry.name.is_some() {
                    record.name = entry.name.clone();
                }
            }
        }
    }
}

/// A change in an address's live status between two registry states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub ip: Ipv4Addr,
    pub status: DeviceStatus,
}

/// Addresses that came online or were newly surfaced offline
pub fn transitions(prev: &Snapshot, next: &Snapshot) -> Vec<Transition> {
    next.iter()
        .filter(|(ip, entry)| prev.get(ip).map(|p| p.status) != Some(entry.status))
        .map(|(ip, entry)| Transition {
            ip: *ip,
            status: entry.status,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn online(mac: Option<&str>, name: Option<&str>) -> SnapshotEntry {
        SnapshotEntry {
            mac: mac.map(str::to_string),
            name: name.map(str::to_string),
            status: DeviceStatus::Online,
        }
    }

    fn snapshot(entries: &[(&str, SnapshotEntry)]) -> Snapshot {
        entries.iter().map(|(a, e)| (ip(a), e.clone())).collect()
    }

    #[test]
    fn test_first_observation_records_history() {
        let now = Utc::now();
        let state = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.5", online(Some("aa:bb"), Some("nas")))]),
            now,
            &ReconcileOptions::default(),
        );

        let record = &state.history[&ip("10.0.0.5")];
        assert_eq!(record.first_seen, now);
        assert_eq!(record.mac.as_deref(), Some("aa:bb"));
        assert_eq!(record.name.as_deref(), Some("nas"));
        assert_eq!(state.last_seen[&ip("10.0.0.5")], now);
        assert_eq!(state.cycle, 1);
    }

    #[test]
    fn test_history_is_monotonic_and_first_seen_stable() {
        let opts = ReconcileOptions::default();
        let t0 = Utc::now();
        let cycles = [
            snapshot(&[("10.0.0.1", online(None, None)), ("10.0.0.2", online(None, None))]),
            snapshot(&[("10.0.0.2", online(None, None))]),
            snapshot(&[]),
            snapshot(&[("10.0.0.3", online(None, None)), ("10.0.0.1", online(None, None))]),
        ];

        let mut state = RegistryState::default();
        let mut first_seen: BTreeMap<Ipv4Addr, DateTime<Utc>> = BTreeMap::new();
        for (i, snap) in cycles.into_iter().enumerate() {
            let now = t0 + Duration::seconds(10 * i as i64);
            let before: Vec<_> = state.history.keys().copied().collect();
            state = reconcile(&state, snap, now, &opts);

            for addr in before {
                assert!(state.history.contains_key(&addr), "history lost {}", addr);
            }
            for (addr, record) in &state.history {
                let seen = first_seen.entry(*addr).or_insert(record.first_seen);
                assert_eq!(*seen, record.first_seen);
            }
        }
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[&ip("10.0.0.3")].first_seen, t0 + Duration::seconds(30));
    }

    #[test]
    fn test_offline_surfaced_once_then_omitted() {
        let opts = ReconcileOptions::default();
        let t0 = Utc::now();
        let host = ip("10.0.0.5");

        let mut prev = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.5", online(Some("aa:bb"), Some("nas")))]),
            t0,
            &opts,
        );
        assert!(prev.live[&host].is_online());

        let first_absent = reconcile(&prev, Snapshot::new(), t0 + Duration::seconds(10), &opts);
        let entry = &first_absent.live[&host];
        assert_eq!(entry.status, DeviceStatus::Offline);
        assert_eq!(entry.mac.as_deref(), Some("aa:bb"));
        assert_eq!(entry.name.as_deref(), Some("nas"));

        let second_absent =
            reconcile(&first_absent, Snapshot::new(), t0 + Duration::seconds(20), &opts);
        assert!(!second_absent.live.contains_key(&host));
        assert!(second_absent.history.contains_key(&host));

        let third_absent =
            reconcile(&second_absent, Snapshot::new(), t0 + Duration::seconds(30), &opts);
        assert!(!third_absent.live.contains_key(&host));

        prev = reconcile(
            &third_absent,
            snapshot(&[("10.0.0.5", online(None, None))]),
            t0 + Duration::seconds(40),
            &opts,
        );
        assert!(prev.live[&host].is_online());
        assert_eq!(prev.last_seen[&host], t0 + Duration::seconds(40));
        assert_eq!(prev.history[&host].first_seen, t0);
    }

    #[test]
    fn test_offline_entry_copied_from_history_not_previous_live() {
        let opts = ReconcileOptions::default();
        let now = Utc::now();
        let host = ip("10.0.0.5");

        let mut prev = RegistryState::default();
        prev.cycle = 4;
        prev.history.insert(
            host,
            IdentityRecord::new(Some("11:22".to_string()), Some("old-name".to_string()), now),
        );
        prev.live.insert(host, online(Some("99:99"), Some("live-name")));

        let next = reconcile(&prev, Snapshot::new(), now, &opts);
        assert_eq!(next.live[&host].status, DeviceStatus::Offline);
        assert_eq!(next.live[&host].mac.as_deref(), Some("11:22"));
        assert_eq!(next.live[&host].name.as_deref(), Some("old-name"));
    }

    #[test]
    fn test_history_surfaced_once_after_startup() {
        let opts = ReconcileOptions::default();
        let now = Utc::now();
        let mut history = BTreeMap::new();
        history.insert(ip("10.0.0.9"), IdentityRecord::new(None, Some("printer".to_string()), now));
        let restored = RegistryState::from_history(history, BTreeMap::new());

        let first = reconcile(&restored, Snapshot::new(), now, &opts);
        assert_eq!(first.live[&ip("10.0.0.9")].status, DeviceStatus::Offline);

        let second = reconcile(&first, Snapshot::new(), now, &opts);
        assert!(second.live.is_empty());
    }

    #[test]
    fn test_always_surface_policy() {
        let opts = ReconcileOptions {
            offline_policy: OfflinePolicy::AlwaysSurface,
            ..Default::default()
        };
        let now = Utc::now();
        let mut state = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.5", online(None, None))]),
            now,
            &opts,
        );
        for _ in 0..3 {
            state = reconcile(&state, Snapshot::new(), now, &opts);
            assert_eq!(state.live[&ip("10.0.0.5")].status, DeviceStatus::Offline);
        }
    }

    #[test]
    fn test_identity_keep_first_ignores_new_values() {
        let opts = ReconcileOptions::default();
        let t0 = Utc::now();
        let state = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.7", online(Some("aa:aa"), Some("laptop")))]),
            t0,
            &opts,
        );
        let state = reconcile(
            &state,
            snapshot(&[("10.0.0.7", online(Some("bb:bb"), Some("phone")))]),
            t0 + Duration::seconds(10),
            &opts,
        );
        let record = &state.history[&ip("10.0.0.7")];
        assert_eq!(record.mac.as_deref(), Some("aa:aa"));
        assert_eq!(record.name.as_deref(), Some("laptop"));
        // live view still reports what was observed this cycle
        assert_eq!(state.live[&ip("10.0.0.7")].mac.as_deref(), Some("bb:bb"));
    }

    #[test]
    fn test_identity_track_latest_keeps_first_seen() {
        let opts = ReconcileOptions {
            identity_policy: IdentityPolicy::TrackLatest,
            ..Default::default()
        };
        let t0 = Utc::now();
        let state = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.7", online(Some("aa:aa"), Some("laptop")))]),
            t0,
            &opts,
        );
        let state = reconcile(
            &state,
            snapshot(&[("10.0.0.7", online(Some("bb:bb"), None))]),
            t0 + Duration::seconds(10),
            &opts,
        );
        let record = &state.history[&ip("10.0.0.7")];
        assert_eq!(record.mac.as_deref(), Some("bb:bb"));
        assert_eq!(record.name.as_deref(), Some("laptop"));
        assert_eq!(record.first_seen, t0);
    }

    #[test]
    fn test_last_seen_only_for_observed_addresses() {
        let now = Utc::now();
        let mut prev = RegistryState::default();
        prev.history.insert(ip("10.0.0.8"), IdentityRecord::new(None, None, now));

        let next = reconcile(
            &prev,
            snapshot(&[("10.0.0.1", online(None, None))]),
            now,
            &ReconcileOptions::default(),
        );
        assert!(next.last_seen.contains_key(&ip("10.0.0.1")));
        assert!(!next.last_seen.contains_key(&ip("10.0.0.8")));
    }

    #[test]
    fn test_list_devices_joins_times() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let opts = ReconcileOptions::default();
        let state = reconcile(
            &RegistryState::default(),
            snapshot(&[("10.0.0.1", online(Some("aa"), None))]),
            t0,
            &opts,
        );
        let state = reconcile(&state, snapshot(&[("10.0.0.1", online(Some("aa"), None))]), t1, &opts);

        let devices = state.list_devices();
        let view = &devices[&ip("10.0.0.1")];
        assert_eq!(view.first_seen, Some(t0));
        assert_eq!(view.last_seen, Some(t1));
        assert_eq!(view.status, DeviceStatus::Online);
        assert_eq!(state.device(ip("10.0.0.2")), None);
    }

    #[test]
    fn test_record_refresh_updates_single_address() {
        let t0 = Utc::now();
        let opts = ReconcileOptions::default();
        let mut prev = RegistryState::default();
        prev.cycle = 3;
        prev.live.insert(ip("10.0.0.1"), online(None, None));

        let next = record_refresh(
            &prev,
            ip("10.0.0.2"),
            Some("cc:dd".to_string()),
            Some("tv".to_string()),
            t0,
            &opts,
        );
        assert_eq!(next.cycle, 3);
        assert_eq!(next.live.len(), 2);
        assert!(next.live[&ip("10.0.0.2")].is_online());
        assert_eq!(next.history[&ip("10.0.0.2")].first_seen, t0);
        assert_eq!(next.last_seen[&ip("10.0.0.2")], t0);
    }

    #[test]
    fn test_transitions() {
        let prev = snapshot(&[("10.0.0.1", online(None, None)), ("10.0.0.2", online(None, None))]);
        let mut next = snapshot(&[("10.0.0.1", online(None, None)), ("10.0.0.3", online(None, None))]);
        next.insert(
            ip("10.0.0.2"),
            SnapshotEntry {
                mac: None,
                name: None,
                status: DeviceStatus::Offline,
            },
        );

        let changes = transitions(&prev, &next);
        assert_eq!(
            changes,
            vec![
                Transition { ip: ip("10.0.0.2"), status: DeviceStatus::Offline },
                Transition { ip: ip("10.0.0.3"), status: DeviceStatus::Online },
            ]
        );
    }
}
