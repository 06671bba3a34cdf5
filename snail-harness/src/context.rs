//! Per-invocation context.
//!
//! Everything a command needs is built once from the configuration and
//! passed down explicitly: the configuration snapshot and the components
//! built on top of the hypervisor handle.

use std::sync::Arc;
use tracing::debug;

use snail_fleet::{
    discovery_from_config, FleetDiscovery, HarnessConfig, InventoryProjector, LifecycleOrchestrator,
    PlaybookDispatcher, ScriptProvisioner,
};
use snail_hypervisor::{Hypervisor, VirshBackend};

/// Build the `virsh` backend described by the configuration.
pub fn virsh_from_config(config: &HarnessConfig) -> VirshBackend {
    let backend = VirshBackend::new()
        .with_timeout(config.hypervisor.command_timeout())
        .with_sudo(config.hypervisor.use_sudo);

    match &config.hypervisor.uri {
        Some(uri) => backend.with_uri(uri.clone()),
        None => backend,
    }
}

#[derive(Clone)]
pub struct HarnessContext {
    config: Arc<HarnessConfig>,
    discovery: FleetDiscovery,
}

impl HarnessContext {
    /// Context backed by `virsh`.
    pub fn from_config(config: HarnessConfig) -> Self {
        let hypervisor: Arc<dyn Hypervisor> = Arc::new(virsh_from_config(&config));
        Self::with_hypervisor(config, hypervisor)
    }

    /// Context backed by any hypervisor implementation.
    pub fn with_hypervisor(config: HarnessConfig, hypervisor: Arc<dyn Hypervisor>) -> Self {
        let discovery = discovery_from_config(hypervisor, &config);
        debug!(
            prefix = %config.vms.name_prefix,
            concurrency = config.hypervisor.discovery_concurrency,
            "Harness context ready"
        );

        Self {
            config: Arc::new(config),
            discovery,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn discovery(&self) -> &FleetDiscovery {
        &self.discovery
    }

    pub fn orchestrator(&self) -> LifecycleOrchestrator {
        let provisioner = Arc::new(ScriptProvisioner::new(self.config.scripts_dir()));
        LifecycleOrchestrator::new(self.discovery.clone(), provisioner, self.config.clone())
    }

    pub fn projector(&self) -> InventoryProjector {
        InventoryProjector::new(self.discovery.clone(), &self.config)
    }

    pub fn dispatcher(&self) -> PlaybookDispatcher {
        PlaybookDispatcher::from_config(&self.config)
    }
}
