//! Error types shared by the probes and the persistence adapter

use thiserror::Error;

/// A discovery technique could not run or could not finish
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no usable network interface: {0}")]
    NoInterface(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),
    #[error("datalink channel error: {0}")]
    Channel(String),
    #[error("mDNS error: {0}")]
    Mdns(String),
    #[error("probe task failed: {0}")]
    Join(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Map an IO error onto the taxonomy, keeping permission problems distinct
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(format!("{}: {}", context, err))
        } else {
            Self::Io(err)
        }
    }
}

/// The history file could not be read or written
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
