//! Device types for tracking hosts seen on the local subnet

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Whether a device answered during the most recent cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device was observed by at least one probe
    Online,
    /// Device is known from history but was not observed
    Offline,
}

/// What a single probe learned about one address during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Hardware address, if the probe can see the link layer
    pub mac: Option<String>,
    /// Human-readable name, if the probe carries one
    pub name: Option<String>,
}

impl Observation {
    pub fn new(mac: Option<String>, name: Option<String>) -> Self {
        Self { mac, name }
    }

    /// An observation that only confirms the address is alive
    pub fn bare() -> Self {
        Self::default()
    }

    pub fn with_mac(mac: impl Into<String>) -> Self {
        Self {
            mac: Some(mac.into()),
            name: None,
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            mac: None,
            name: Some(name.into()),
        }
    }
}

/// Partial per-probe view of the subnet, keyed by address
pub type ObservationMap = BTreeMap<Ipv4Addr, Observation>;

/// Merged per-address result for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub mac: Option<String>,
    pub name: Option<String>,
    pub status: DeviceStatus,
}

impl SnapshotEntry {
    pub fn online(observation: Observation) -> Self {
        Self {
            mac: observation.mac,
            name: observation.name,
            status: DeviceStatus::Online,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// One cycle's merged view of every address that answered
pub type Snapshot = BTreeMap<Ipv4Addr, SnapshotEntry>;

/// Persistent identity of an address, recorded the first time it is seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default, with = "crate::history::unknown_as_none")]
    pub name: Option<String>,
    #[serde(default, with = "crate::history::unknown_as_none")]
    pub mac: Option<String>,
    #[serde(with = "crate::history::timestamp")]
    pub first_seen: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(mac: Option<String>, name: Option<String>, first_seen: DateTime<Utc>) -> Self {
        Self {
            name,
            mac,
            first_seen,
        }
    }

    /// Offline entry synthesized from history
    pub fn to_offline_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            mac: self.mac.clone(),
            name: self.name.clone(),
            status: DeviceStatus::Offline,
        }
    }
}

/// A device as presented to readers of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceView {
    pub mac: Option<String>,
    pub name: Option<String>,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub first_seen: Option<DateTime<Utc>>,
}
