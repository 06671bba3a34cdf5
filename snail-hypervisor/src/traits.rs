//! Core hypervisor abstraction trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::VmState;

/// Core hypervisor abstraction trait.
///
/// Mirrors the slice of the hypervisor CLI the harness relies on: three
/// read queries and three domain actions. VMs are addressed by their domain
/// name, which is also the fleet's canonical key.
///
/// Every call is independent. Implementations must bound each call in time
/// and must not cache results; callers re-query to observe transitions.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    // =========================================================================
    // Queries
    // =========================================================================
    
    /// List the names of all defined domains, running or not.
    async fn list_domains(&self) -> Result<Vec<String>>;
    
    /// Get the current run state of a domain.
    async fn domain_state(&self, name: &str) -> Result<VmState>;
    
    /// Get the raw network address report for a domain.
    ///
    /// The text is free-form (`virsh domifaddr` output) and is not parsed
    /// here; its format is not a stable contract.
    async fn domain_addresses(&self, name: &str) -> Result<String>;
    
    // =========================================================================
    // Actions
    // =========================================================================
    
    /// Start a defined domain.
    async fn start(&self, name: &str) -> Result<()>;
    
    /// Request a graceful (ACPI) shutdown. Returns once the request is
    /// accepted; the domain stops asynchronously.
    async fn shutdown(&self, name: &str) -> Result<()>;
    
    /// Forcefully power off a domain. The domain stays defined.
    async fn destroy(&self, name: &str) -> Result<()>;
}
