//! Ansible dynamic inventory.
//!
//! Projects live discovery output into the JSON document Ansible expects
//! from an inventory script:
//!
//! ```text
//! {
//!   "_meta": { "hostvars": { "<vm>": { "ansible_host": "<ip>", "vm_name": "<vm>" } } },
//!   "all": { "children": ["snail_vms"] },
//!   "snail_vms": { "hosts": ["<vm>", ...], "vars": { ... } }
//! }
//! ```
//!
//! Only running VMs with an address are included.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::discovery::{FleetDiscovery, VmRecord};

/// Per-host variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVars {
    pub ansible_host: String,
    pub vm_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMeta {
    pub hostvars: BTreeMap<String, HostVars>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllGroup {
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub hosts: Vec<String>,
    pub vars: BTreeMap<String, String>,
}

/// Full `--list` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDocument {
    #[serde(rename = "_meta")]
    pub meta: InventoryMeta,
    pub all: AllGroup,
    #[serde(flatten)]
    pub groups: BTreeMap<String, HostGroup>,
}

impl InventoryDocument {
    /// Hosts across all groups, in group order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.groups
            .values()
            .flat_map(|g| g.hosts.iter().map(String::as_str))
    }
}

/// Builds inventory documents from discovery.
#[derive(Clone)]
pub struct InventoryProjector {
    discovery: FleetDiscovery,
    group: String,
    group_vars: BTreeMap<String, String>,
}

impl InventoryProjector {
    pub fn new(discovery: FleetDiscovery, config: &HarnessConfig) -> Self {
        let mut group_vars = config.inventory.extra_vars.clone();
        group_vars.insert("ansible_user".to_string(), config.vms.username.clone());
        group_vars.insert(
            "ansible_ssh_private_key_file".to_string(),
            config.ssh_key_path().display().to_string(),
        );
        group_vars.insert(
            "ansible_python_interpreter".to_string(),
            config.inventory.python_interpreter.clone(),
        );

        Self {
            discovery,
            group: config.inventory.group.clone(),
            group_vars,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Inventory for the whole live fleet.
    pub async fn project_all(&self) -> InventoryDocument {
        let fleet = self.discovery.list_fleet().await;
        self.project_records(&fleet)
    }

    /// Inventory for an already-taken fleet snapshot.
    pub fn project_records(&self, records: &[VmRecord]) -> InventoryDocument {
        let mut hostvars = BTreeMap::new();
        let mut hosts = Vec::new();

        for record in records {
            let address = match record.address {
                Some(address) if record.state.is_running() => address,
                _ => {
                    debug!(vm_name = %record.name, state = %record.state, "Excluded from inventory");
                    continue;
                }
            };

            hostvars.insert(
                record.name.clone(),
                HostVars {
                    ansible_host: address.to_string(),
                    vm_name: record.name.clone(),
                },
            );
            hosts.push(record.name.clone());
        }

        let mut groups = BTreeMap::new();
        groups.insert(
            self.group.clone(),
            HostGroup {
                hosts,
                vars: self.group_vars.clone(),
            },
        );

        InventoryDocument {
            meta: InventoryMeta { hostvars },
            all: AllGroup {
                children: vec![self.group.clone()],
            },
            groups,
        }
    }

    /// Variables for one host, `None` when it has no address.
    ///
    /// `--host` callers print `None` as an empty object.
    pub async fn project_one(&self, name: &str) -> Option<HostVars> {
        let address = self.discovery.resolve_address(name).await?;
        Some(HostVars {
            ansible_host: address.to_string(),
            vm_name: name.to_string(),
        })
    }
}
