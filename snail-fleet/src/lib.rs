//! # Snail Fleet
//!
//! Fleet state and orchestration for the snail-core test VMs.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!                │    snail-harness     │
//!                │  (CLI / inventory)   │
//!                └──────────┬───────────┘
//!                           │
//!     ┌──────────────┬──────┴───────┬────────────────┐
//!     ▼              ▼              ▼                ▼
//! ┌────────┐  ┌─────────────┐  ┌───────────┐  ┌────────────┐
//! │Dispatch│  │Orchestrator │  │ Inventory │  │ Provision  │
//! └────────┘  └──────┬──────┘  └─────┬─────┘  │  (scripts) │
//!                    │               │        └────────────┘
//!                    ▼               ▼
//!              ┌─────────────────────────┐
//!              │  Selection / Discovery  │
//!              └────────────┬────────────┘
//!                           ▼
//!              ┌─────────────────────────┐
//!              │  Identity + Hypervisor  │
//!              └─────────────────────────┘
//! ```
//!
//! The hypervisor is the only source of truth. Nothing here caches fleet
//! state; every operation re-derives it through [`FleetDiscovery`].

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod inventory;
pub mod orchestrator;
pub mod provision;
pub mod selection;

pub use config::HarnessConfig;
pub use discovery::{extract_ipv4, FleetDiscovery, FleetMember, VmRecord};
pub use dispatch::{PlaybookDispatcher, PlaybookRequest};
pub use error::{FleetError, Result};
pub use identity::{sort_fleet, version_key, IdentityCodec, NameForm, VmIdentity};
pub use inventory::{HostVars, InventoryDocument, InventoryProjector};
pub use orchestrator::{
    BatchReport, CreateReport, CreateRequest, LifecycleOrchestrator, Operation, ShutdownWait,
    VmOutcome, VmResult,
};
pub use provision::{
    base_image_path, expand_specs, ProvisionPlan, Provisioner, ScriptProvisioner, VmSpec,
};
pub use selection::{FleetSelection, TargetExpr};

use std::sync::Arc;

use snail_hypervisor::Hypervisor;

/// Discovery wired up from configuration.
pub fn discovery_from_config(hypervisor: Arc<dyn Hypervisor>, config: &HarnessConfig) -> FleetDiscovery {
    let codec = IdentityCodec::new(
        config.vms.name_prefix.clone(),
        config.vms.default_distribution.clone(),
    );
    FleetDiscovery::new(hypervisor, codec).with_concurrency(config.hypervisor.discovery_concurrency)
}
