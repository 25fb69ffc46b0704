//! Persistence of identity history and last-seen times
//!
//! The file is a single JSON object with two maps:
//!
//! ```json
//! {
//!   "device_history": { "192.168.1.10": { "name": "printer", "mac": "aa:bb:..", "first_seen": "..." } },
//!   "last_seen": { "192.168.1.10": "2026-01-10T12:00:00Z" }
//! }
//! ```
//!
//! Loading never fails: a missing or corrupt file starts the registry empty.
//! Files written by older tools that used `"<unknown>"` placeholders and
//! offset-less local timestamps are still accepted.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::device::IdentityRecord;
use crate::error::HistoryError;
use crate::reconcile::RegistryState;

/// Placeholder older history files use for absent names and MACs
pub const UNKNOWN: &str = "<unknown>";

/// On-disk form of the registry's durable state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFile {
    #[serde(default)]
    pub device_history: BTreeMap<Ipv4Addr, IdentityRecord>,
    #[serde(default, with = "timestamp_map")]
    pub last_seen: BTreeMap<Ipv4Addr, DateTime<Utc>>,
}

impl HistoryFile {
    /// Read and parse a history file
    pub fn from_file(path: &Path) -> Result<Self, HistoryError> {
        let content = std::fs::read_to_string(path)?;
        let file: HistoryFile = serde_json::from_str(&content)?;
        Ok(file)
    }

    /// Load history, falling back to empty maps on any problem
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "History file not found, starting empty");
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(file) => {
                info!(
                    path = %path.display(),
                    devices = file.device_history.len(),
                    "Loaded device history"
                );
                file
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load device history, starting empty");
                Self::default()
            }
        }
    }

    /// Write history through a temporary sibling so readers never see a partial file
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), devices = self.device_history.len(), "Saved device history");
        Ok(())
    }

    pub fn from_state(state: &RegistryState) -> Self {
        Self {
            device_history: state.history.clone(),
            last_seen: state.last_seen.clone(),
        }
    }

    pub fn into_state(self) -> RegistryState {
        RegistryState::from_history(self.device_history, self.last_seen)
    }
}

/// Parse RFC 3339, or an offset-less ISO-8601 time taken as local time
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `Option<String>` that reads `"<unknown>"` and `""` as `None`
pub mod unknown_as_none {
    use super::UNKNOWN;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(s) => serializer.serialize_some(s),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|s| !s.is_empty() && s != UNKNOWN))
    }
}

/// A single timestamp, written as RFC 3339
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_timestamp(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", s)))
    }
}

/// A map of address to timestamp
pub mod timestamp_map {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::ser::SerializeMap;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<Ipv4Addr, DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (ip, ts) in value {
            map.serialize_entry(ip, &ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Ipv4Addr, DateTime<Utc>>, D::Error> {
        let raw = BTreeMap::<Ipv4Addr, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(ip, s)| {
                super::parse_timestamp(&s)
                    .map(|ts| (ip, ts))
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp for {}: {}", ip, s)))
            })
            .collect()
    }
}
