//! Error types for the hypervisor abstraction layer.

use thiserror::Error;

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// The hypervisor CLI could not be spawned at all.
    #[error("Failed to run {command}: {reason}")]
    SpawnFailed { command: String, reason: String },
    
    /// The hypervisor CLI ran but exited non-zero.
    #[error("{command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    
    /// The hypervisor CLI did not finish within the configured timeout.
    #[error("{command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    
    /// VM was not found.
    #[error("VM not found: {0}")]
    VmNotFound(String),
    
    /// VM is in an invalid state for the requested operation.
    #[error("Invalid VM state for operation: {0}")]
    InvalidState(String),
    
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HypervisorError {
    /// Whether the failure came from the call itself timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HypervisorError::Timeout { .. })
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
