//! lanwatch core - device model, merge and reconciliation engines
//!
//! This crate holds the synchronous half of lanwatch:
//! - Device types shared by probes, the registry and the HTTP layer
//! - Per-probe outcome types and the merge engine that folds them together
//! - The reconciliation engine deciding online/offline transitions
//! - Persistence of identity history and last-seen times

pub mod device;
pub mod error;
pub mod history;
pub mod merge;
pub mod probe;
pub mod reconcile;
pub mod subnet;

pub use device::{DeviceStatus, DeviceView, IdentityRecord, Observation, ObservationMap, Snapshot, SnapshotEntry};
pub use error::{HistoryError, ProbeError};
pub use history::HistoryFile;
pub use merge::{apply_names, merge_observations, unnamed, NameOverlay};
pub use probe::{ProbeFailure, ProbeKind, ProbeOutcome};
pub use reconcile::{
    reconcile, record_refresh, transitions, IdentityPolicy, OfflinePolicy, ReconcileOptions, RegistryState,
    Transition,
};
pub use subnet::Subnet;
