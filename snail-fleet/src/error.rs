//! Error types for fleet operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by fleet operations.
///
/// Hypervisor failures never show up here. Discovery degrades the affected
/// record and the orchestrator records a per-VM failure instead. What
/// remains are missing prerequisites, user-targeting mistakes and hard
/// failures of a single requested action.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Named VM is not part of the current fleet.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// VM exists but is not running.
    #[error("VM {name} is not running (state: {state})")]
    NotRunning { name: String, state: String },

    /// VM is running but has no discoverable address.
    #[error("VM {0} has no IP address")]
    NoAddress(String),

    /// Target pattern matched nothing in the fleet.
    #[error("No VMs match '{0}'")]
    NoMatch(String),

    /// Invalid glob in a target expression.
    #[error("Invalid target pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Distribution with no known base image naming.
    #[error("Unknown distribution: {0}")]
    UnknownDistribution(String),

    /// Malformed `distro:version` spec.
    #[error("Invalid VM spec '{0}'")]
    InvalidSpec(String),

    /// Provisioning or teardown script missing.
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// Playbook file missing.
    #[error("Playbook not found: {}", .0.display())]
    PlaybookNotFound(PathBuf),

    /// Base image download failed.
    #[error("Failed to download base image for {distro} {version}")]
    ImageAcquisitionFailed { distro: String, version: String },

    /// Script ran but reported failure.
    #[error("{script} failed with status {status}")]
    ScriptFailed { script: String, status: i32 },

    /// Provisioning finished but no VM exists afterwards.
    #[error("Failed to create VMs: no fleet VMs exist after provisioning")]
    NothingProvisioned,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Filesystem or process spawn error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Extra-vars payload could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
