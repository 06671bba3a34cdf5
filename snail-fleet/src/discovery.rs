//! Fleet discovery.
//!
//! Reconciles what the hypervisor reports with the naming scheme. Every call
//! re-derives the fleet from the hypervisor; nothing is cached. Hypervisor
//! failures never escape from here: a failed listing is an empty fleet, a
//! failed per-VM query degrades only that VM's record.

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use snail_hypervisor::{Hypervisor, VmState};

use crate::identity::{sort_fleet, IdentityCodec, VmIdentity};

static IPV4_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").expect("valid IPv4 pattern")
});

/// Extract the first IPv4 address from free-form `domifaddr` output.
///
/// Tokens that look like an address but are out of range (`300.1.1.1`) are
/// skipped.
pub fn extract_ipv4(text: &str) -> Option<Ipv4Addr> {
    IPV4_TOKEN
        .find_iter(text)
        .find_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
}

/// A fleet VM by name, before any per-VM query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetMember {
    pub name: String,
    pub identity: VmIdentity,
}

/// Live snapshot of one fleet VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmRecord {
    pub identity: VmIdentity,
    /// Name as reported by the hypervisor
    pub name: String,
    pub state: VmState,
    /// Only set when running and an address was found
    pub address: Option<Ipv4Addr>,
}

impl VmRecord {
    /// Running with a resolved address.
    pub fn is_reachable(&self) -> bool {
        self.state.is_running() && self.address.is_some()
    }
}

/// Queries the hypervisor for the current fleet.
#[derive(Clone)]
pub struct FleetDiscovery {
    hypervisor: Arc<dyn Hypervisor>,
    codec: IdentityCodec,
    concurrency: usize,
}

impl FleetDiscovery {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, codec: IdentityCodec) -> Self {
        Self {
            hypervisor,
            codec,
            concurrency: 1,
        }
    }

    /// Allow up to `concurrency` per-VM queries in flight. Output order is
    /// unaffected.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn codec(&self) -> &IdentityCodec {
        &self.codec
    }

    pub fn hypervisor(&self) -> &Arc<dyn Hypervisor> {
        &self.hypervisor
    }

    /// Fleet VMs in display order, without state or address lookups.
    ///
    /// An empty result is ambiguous: no VMs, or the hypervisor could not be
    /// listed.
    pub async fn list_members(&self) -> Vec<FleetMember> {
        let names = match self.hypervisor.list_domains().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list domains, treating fleet as empty");
                return Vec::new();
            }
        };

        let mut members: Vec<FleetMember> = names
            .into_iter()
            .filter_map(|name| {
                let identity = self.codec.parse(&name)?;
                if !identity.is_parsed() {
                    debug!(vm_name = %name, "Fleet VM name does not decode, ordering it last");
                }
                Some(FleetMember { name, identity })
            })
            .collect();

        sort_fleet(&mut members, |m| &m.identity);

        debug!(count = members.len(), prefix = %self.codec.prefix(), "Discovered fleet members");
        members
    }

    /// Full fleet snapshot with state and addresses.
    pub async fn list_fleet(&self) -> Vec<VmRecord> {
        let members = self.list_members().await;
        self.inspect_members(members).await
    }

    /// Snapshot the given members, preserving their order.
    pub async fn inspect_members(&self, members: Vec<FleetMember>) -> Vec<VmRecord> {
        // `buffered` yields in input order, and each member appears once, so
        // no VM is queried twice concurrently.
        stream::iter(members)
            .map(|member| self.inspect_member(member))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Snapshot one VM by name. `None` if the name is not a fleet name.
    pub async fn inspect(&self, name: &str) -> Option<VmRecord> {
        let identity = self.codec.parse(name)?;
        let member = FleetMember {
            name: name.to_string(),
            identity,
        };
        Some(self.inspect_member(member).await)
    }

    /// Snapshot a single member.
    #[instrument(skip(self, member), fields(vm_name = %member.name))]
    pub async fn inspect_member(&self, member: FleetMember) -> VmRecord {
        let state = self.query_state(&member.name).await;

        let address = if state.is_running() {
            self.resolve_address(&member.name).await
        } else {
            None
        };

        VmRecord {
            identity: member.identity,
            name: member.name,
            state,
            address,
        }
    }

    /// Run state of a VM, `Unknown` on any failure.
    pub async fn query_state(&self, name: &str) -> VmState {
        match self.hypervisor.domain_state(name).await {
            Ok(state) => state,
            Err(e) => {
                warn!(vm_name = %name, error = %e, "State query failed");
                VmState::Unknown
            }
        }
    }

    /// First IPv4 address the hypervisor reports for a VM, if any.
    pub async fn resolve_address(&self, name: &str) -> Option<Ipv4Addr> {
        match self.hypervisor.domain_addresses(name).await {
            Ok(text) => {
                let address = extract_ipv4(&text);
                if address.is_none() {
                    debug!(vm_name = %name, "No IPv4 address reported yet");
                }
                address
            }
            Err(e) => {
                debug!(vm_name = %name, error = %e, "Address query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snail_hypervisor::MockBackend;

    fn discovery(backend: Arc<MockBackend>) -> FleetDiscovery {
        FleetDiscovery::new(backend, IdentityCodec::new("snail-test", "fedora"))
    }

    #[test]
    fn test_extract_ipv4_from_domifaddr() {
        let output = " Name       MAC address          Protocol     Address\n\
                      -------------------------------------------------------\n \
                      vnet0      52:54:00:ab:cd:ef    ipv4         192.168.124.57/24\n";
        assert_eq!(extract_ipv4(output), Some(Ipv4Addr::new(192, 168, 124, 57)));
    }

    #[test]
    fn test_extract_ipv4_tolerates_noise() {
        assert_eq!(extract_ipv4(""), None);
        assert_eq!(extract_ipv4("vnet0 52:54:00:ab:cd:ef ipv6 fe80::1/64"), None);
        assert_eq!(
            extract_ipv4("bogus 999.1.1.1 then 10.0.0.5"),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
    }

    #[tokio::test]
    async fn test_filters_and_orders_fleet() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-debian-12-1", VmState::ShutOff);
        backend.add_domain("unrelated-vm", VmState::Running);
        backend.add_domain("snail-test-fedora-42-1", VmState::ShutOff);
        backend.add_domain("snail-test-fedora-42-3", VmState::ShutOff);
        backend.add_domain("snail-test-broken", VmState::ShutOff);

        let names: Vec<String> = discovery(backend)
            .list_members()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();

        assert_eq!(
            names,
            vec![
                "snail-test-fedora-42-3",
                "snail-test-fedora-42-1",
                "snail-test-debian-12-1",
                "snail-test-broken",
            ]
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_empty_fleet() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-fedora-42-1", VmState::Running);
        backend.fail_listing(true);

        assert!(discovery(backend).list_fleet().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_failure_degrades_one_record() {
        let backend = Arc::new(MockBackend::new());
        for i in 1..=5 {
            backend.add_running_domain(format!("snail-test-fedora-42-{}", i), &format!("10.0.0.{}", i));
        }
        backend.fail_queries_for("snail-test-fedora-42-3");

        let fleet = discovery(backend).list_fleet().await;

        assert_eq!(fleet.len(), 5);
        let degraded: Vec<&VmRecord> = fleet.iter().filter(|r| r.state == VmState::Unknown).collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].name, "snail-test-fedora-42-3");
        assert_eq!(degraded[0].address, None);

        for record in fleet.iter().filter(|r| r.name != "snail-test-fedora-42-3") {
            assert_eq!(record.state, VmState::Running);
            assert!(record.address.is_some());
        }
    }

    #[tokio::test]
    async fn test_address_only_queried_when_running() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-fedora-42-1", VmState::ShutOff);

        let fleet = discovery(backend.clone()).list_fleet().await;

        assert_eq!(fleet[0].address, None);
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, snail_hypervisor::MockCall::DomainAddresses(_))));
    }

    #[tokio::test]
    async fn test_inspect_single_vm() {
        let backend = Arc::new(MockBackend::new());
        backend.add_running_domain("snail-test-ubuntu-24.04-1", "192.168.122.40");
        let discovery = discovery(backend);

        let record = discovery.inspect("snail-test-ubuntu-24.04-1").await.unwrap();
        assert_eq!(record.state, VmState::Running);
        assert_eq!(record.address, Some(Ipv4Addr::new(192, 168, 122, 40)));
        assert!(record.is_reachable());

        assert!(discovery.inspect("unrelated-vm").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_discovery_keeps_order() {
        let backend = Arc::new(MockBackend::new());
        for i in 1..=8 {
            backend.add_running_domain(format!("snail-test-fedora-42-{}", i), &format!("10.0.1.{}", i));
        }

        let sequential = discovery(backend.clone()).list_fleet().await;
        let concurrent = discovery(backend).with_concurrency(4).list_fleet().await;

        assert_eq!(sequential, concurrent);
        assert_eq!(concurrent[0].name, "snail-test-fedora-42-8");
    }
}
