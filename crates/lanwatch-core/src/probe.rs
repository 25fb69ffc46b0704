//! Per-probe result types
//!
//! Every discovery technique reports either a partial map or the reason it
//! contributed nothing. The merge engine folds failures into empty
//! contributions so a broken probe never aborts a cycle.

use std::fmt;

use crate::device::ObservationMap;
use crate::error::ProbeError;

/// The discovery techniques a cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    LinkLayer,
    Reachability,
    Multicast,
    ReverseName,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LinkLayer => "link-layer",
            Self::Reachability => "reachability",
            Self::Multicast => "multicast",
            Self::ReverseName => "reverse-name",
        };
        f.write_str(name)
    }
}

/// Why a probe produced no results this cycle
#[derive(Debug)]
pub struct ProbeFailure {
    pub probe: ProbeKind,
    pub reason: ProbeError,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} probe failed: {}", self.probe, self.reason)
    }
}

/// Result of running one probe
#[derive(Debug)]
pub enum ProbeOutcome {
    Success(ObservationMap),
    Failure(ProbeFailure),
}

impl ProbeOutcome {
    pub fn failure(probe: ProbeKind, reason: ProbeError) -> Self {
        Self::Failure(ProbeFailure { probe, reason })
    }

    /// Wrap a fallible probe result
    pub fn from_result(probe: ProbeKind, result: Result<ObservationMap, ProbeError>) -> Self {
        match result {
            Ok(map) => Self::Success(map),
            Err(reason) => Self::failure(probe, reason),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Observations this probe contributes; a failure contributes none
    pub fn into_observations(self) -> ObservationMap {
        match self {
            Self::Success(map) => map,
            Self::Failure(failure) => {
                tracing::warn!(probe = %failure.probe, reason = %failure.reason, "Probe contributed no results");
                ObservationMap::new()
            }
        }
    }

    /// Number of addresses reported, zero on failure
    pub fn len(&self) -> usize {
        match self {
            Self::Success(map) => map.len(),
            Self::Failure(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
