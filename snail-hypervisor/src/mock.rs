//! Mock hypervisor backend for testing and development.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::VmState;

/// A hypervisor call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListDomains,
    DomainState(String),
    DomainAddresses(String),
    Start(String),
    Shutdown(String),
    Destroy(String),
}

/// Mock hypervisor backend for testing.
///
/// This backend simulates domains in memory without requiring libvirt.
/// Failures can be scripted per domain so tests can exercise the
/// degradation and partial-failure paths. Useful for:
/// - Unit and integration testing
/// - Development without libvirt installed
pub struct MockBackend {
    domains: RwLock<Vec<MockDomain>>,
    faults: RwLock<Faults>,
    calls: RwLock<Vec<MockCall>>,
}

struct MockDomain {
    name: String,
    state: VmState,
    /// Raw `domifaddr`-style text reported while running
    addresses: String,
}

#[derive(Default)]
struct Faults {
    listing: bool,
    queries: HashSet<String>,
    actions: HashSet<String>,
    ignore_shutdown: HashSet<String>,
}

impl MockBackend {
    /// Create a new, empty mock backend.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            domains: RwLock::new(Vec::new()),
            faults: RwLock::new(Faults::default()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Define a domain in the given state with no address report.
    pub fn add_domain(&self, name: impl Into<String>, state: VmState) {
        self.add_domain_with_addresses(name, state, "");
    }

    /// Define a domain with a `domifaddr`-style address report.
    pub fn add_domain_with_addresses(
        &self,
        name: impl Into<String>,
        state: VmState,
        addresses: impl Into<String>,
    ) {
        let name = name.into();
        if let Ok(mut domains) = self.domains.write() {
            domains.retain(|d| d.name != name);
            domains.push(MockDomain {
                name,
                state,
                addresses: addresses.into(),
            });
        }
    }

    /// Convenience: a running domain with a single IPv4 lease.
    pub fn add_running_domain(&self, name: impl Into<String>, ip: &str) {
        let addresses = format!(
            " Name       MAC address          Protocol     Address\n\
             -------------------------------------------------------------------------------\n \
             vnet0      52:54:00:12:34:56    ipv4         {}/24\n",
            ip
        );
        self.add_domain_with_addresses(name, VmState::Running, addresses);
    }

    /// Undefine a domain.
    pub fn remove_domain(&self, name: &str) -> bool {
        match self.domains.write() {
            Ok(mut domains) => {
                let before = domains.len();
                domains.retain(|d| d.name != name);
                domains.len() != before
            }
            Err(_) => false,
        }
    }

    /// Make `list_domains` fail.
    pub fn fail_listing(&self, fail: bool) {
        if let Ok(mut faults) = self.faults.write() {
            faults.listing = fail;
        }
    }

    /// Make state and address queries for `name` fail.
    pub fn fail_queries_for(&self, name: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.queries.insert(name.into());
        }
    }

    /// Make start/shutdown/destroy for `name` fail.
    pub fn fail_actions_for(&self, name: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.actions.insert(name.into());
        }
    }

    /// Accept shutdown requests for `name` without ever stopping it.
    pub fn ignore_shutdown_for(&self, name: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.ignore_shutdown.insert(name.into());
        }
    }

    /// Current state of a domain, bypassing the call journal.
    pub fn state_of(&self, name: &str) -> Option<VmState> {
        self.domains
            .read()
            .ok()?
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.state)
    }

    /// All calls received so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockCall) -> Result<()> {
        let mut calls = self.calls.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        calls.push(call);
        Ok(())
    }

    fn query_fault(&self, name: &str, command: &str) -> Result<()> {
        let faults = self.faults.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        if faults.queries.contains(name) {
            return Err(HypervisorError::CommandFailed {
                command: format!("virsh {} {}", command, name),
                status: 1,
                stderr: "error: failed to get domain".to_string(),
            });
        }
        Ok(())
    }

    fn action_fault(&self, name: &str, command: &str) -> Result<()> {
        let faults = self.faults.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        if faults.actions.contains(name) {
            return Err(HypervisorError::CommandFailed {
                command: format!("virsh {} {}", command, name),
                status: 1,
                stderr: "error: operation failed".to_string(),
            });
        }
        Ok(())
    }

    /// Apply a state transition to an existing domain.
    fn transition<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut MockDomain) -> Result<()>,
    {
        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        let domain = domains
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| HypervisorError::VmNotFound(name.to_string()))?;

        f(domain)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockBackend {
    async fn list_domains(&self) -> Result<Vec<String>> {
        self.record(MockCall::ListDomains)?;

        let listing_fails = self.faults.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?.listing;

        if listing_fails {
            return Err(HypervisorError::CommandFailed {
                command: "virsh list --all --name".to_string(),
                status: 1,
                stderr: "error: failed to connect to the hypervisor".to_string(),
            });
        }

        let domains = self.domains.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        let names: Vec<String> = domains.iter().map(|d| d.name.clone()).collect();
        debug!(count = names.len(), "Listed mock domains");
        Ok(names)
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn domain_state(&self, name: &str) -> Result<VmState> {
        self.record(MockCall::DomainState(name.to_string()))?;
        self.query_fault(name, "domstate")?;

        self.state_of(name)
            .ok_or_else(|| HypervisorError::VmNotFound(name.to_string()))
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn domain_addresses(&self, name: &str) -> Result<String> {
        self.record(MockCall::DomainAddresses(name.to_string()))?;
        self.query_fault(name, "domifaddr")?;

        let domains = self.domains.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        let domain = domains
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| HypervisorError::VmNotFound(name.to_string()))?;

        if domain.state != VmState::Running {
            return Err(HypervisorError::InvalidState("domain is not running".to_string()));
        }

        Ok(domain.addresses.clone())
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn start(&self, name: &str) -> Result<()> {
        self.record(MockCall::Start(name.to_string()))?;
        self.action_fault(name, "start")?;

        self.transition(name, |domain| {
            if domain.state == VmState::Running {
                return Err(HypervisorError::InvalidState("Domain is already active".to_string()));
            }
            domain.state = VmState::Running;
            Ok(())
        })?;

        info!("Mock VM started");
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn shutdown(&self, name: &str) -> Result<()> {
        self.record(MockCall::Shutdown(name.to_string()))?;
        self.action_fault(name, "shutdown")?;

        let ignored = self.faults.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?.ignore_shutdown.contains(name);

        self.transition(name, |domain| {
            if domain.state != VmState::Running {
                return Err(HypervisorError::InvalidState("domain is not running".to_string()));
            }
            domain.state = if ignored { VmState::ShuttingDown } else { VmState::ShutOff };
            Ok(())
        })?;

        info!(ignored, "Mock VM shutdown requested");
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn destroy(&self, name: &str) -> Result<()> {
        self.record(MockCall::Destroy(name.to_string()))?;
        self.action_fault(name, "destroy")?;

        self.transition(name, |domain| {
            if domain.state == VmState::ShutOff {
                return Err(HypervisorError::InvalidState("domain is not running".to_string()));
            }
            domain.state = VmState::ShutOff;
            Ok(())
        })?;

        info!("Mock VM force stopped");
        Ok(())
    }
}
