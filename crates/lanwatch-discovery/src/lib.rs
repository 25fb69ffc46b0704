//! lanwatch discovery - network probes and the discovery scheduler
//!
//! This crate provides the discovery techniques a cycle runs:
//! - ARP sweeps over a raw link-layer channel, with the kernel neighbour table as fallback
//! - A bounded reachability sweep for hosts that did not answer ARP
//! - mDNS-SD service browsing
//! - Reverse DNS for addresses still lacking a name
//!
//! plus the registry store and the scanner that schedules cycles.

pub mod arp;
pub mod mdns;
pub mod ping;
pub mod probes;
pub mod registry;
pub mod resolve;
pub mod scanner;

pub use probes::{NetworkProbes, ProbeConfig, ProbeSet};
pub use registry::DeviceRegistry;
pub use scanner::{DiscoveryEvent, DiscoveryScanner, RefreshOutcome, ScanSummary, ScannerConfig};
