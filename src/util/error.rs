use std::io;

use crate::core::CoreId;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write to sysfs path: {0}")]
    WriteError(String),

    #[error("Failed to read sysfs path: {0}")]
    ReadError(String),

    #[error("Control action not supported: {0}")]
    NotSupported(String),

    #[error("Permission denied: {0}. Try running with sudo.")]
    PermissionDenied(String),

    #[error("Failed to parse value: {0}")]
    ParseError(String),

    #[error("Path missing: {0}")]
    PathMissing(String),

    #[error("CPU {0} is not part of the detected topology")]
    InvalidCore(CoreId),

    #[error("CPU {0} is protected and cannot be taken offline")]
    ProtectedCore(CoreId),
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No CPU cores found: {0}")]
    NoCores(String),

    #[error("CPU {0} is listed in more than one cluster")]
    DuplicateCore(CoreId),

    #[error("Cluster {0} has no cores")]
    EmptyCluster(usize),
}
