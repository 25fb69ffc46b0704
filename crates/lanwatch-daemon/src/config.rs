//! Configuration loading and validation

use anyhow::Result;
use lanwatch_core::{ReconcileOptions, Subnet};
use lanwatch_discovery::{ProbeConfig, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::interfaces;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds between the end of one cycle and the start of the next
    #[serde(default = "default_interval")]
    pub scan_interval_secs: u64,
    /// Where identity history and last-seen times are kept
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            scan_interval_secs: default_interval(),
            history_path: default_history_path(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_interval() -> u64 {
    10
}

fn default_history_path() -> PathBuf {
    PathBuf::from("device_history.json")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnet to scan; detected from the local interfaces when unset
    #[serde(default)]
    pub subnet: Option<Subnet>,
    #[serde(flatten)]
    pub probes: ProbeConfig,
    #[serde(flatten)]
    pub reconcile: ReconcileOptions,
}

impl Config {
    /// The configured subnet, else the first local interface's, else `192.168.1.0/24`
    pub fn resolve_subnet(&self) -> Subnet {
        if let Some(subnet) = self.discovery.subnet {
            return subnet;
        }
        match interfaces::detect_subnet() {
            Some(subnet) => {
                info!(subnet = %subnet, "Detected local subnet");
                subnet
            }
            None => {
                let fallback = Subnet::default_lan();
                warn!(subnet = %fallback, "No usable interface found, using default subnet");
                fallback
            }
        }
    }

    pub fn to_scanner_config(&self, subnet: Subnet) -> ScannerConfig {
        ScannerConfig {
            subnet,
            interval_secs: self.daemon.scan_interval_secs,
            reconcile: self.discovery.reconcile,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
