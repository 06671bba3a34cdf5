//! Configuration management for the test harness.
//!
//! A single YAML file describes the deployment: the VM naming prefix, the
//! distributions on offer, where base images and scripts live, and how the
//! inventory and shutdown polling behave. Every section is optional and
//! falls back to defaults.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{FleetError, Result};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// VM naming and distribution settings
    pub vms: VmsConfig,
    /// Host-side directories used during provisioning
    pub host: HostConfig,
    /// Script and playbook locations
    pub paths: PathsConfig,
    /// Hypervisor access
    pub hypervisor: HypervisorConfig,
    /// Dynamic inventory settings
    pub inventory: InventoryConfig,
    /// Graceful shutdown polling
    pub shutdown: ShutdownConfig,
    /// Ansible invocation
    pub ansible: AnsibleConfig,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            vms: VmsConfig::default(),
            host: HostConfig::default(),
            paths: PathsConfig::default(),
            hypervisor: HypervisorConfig::default(),
            inventory: InventoryConfig::default(),
            shutdown: ShutdownConfig::default(),
            ansible: AnsibleConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file.
    ///
    /// Relative paths in the file resolve against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FleetError::InvalidConfig(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content).map_err(|source| FleetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;
        debug!(path = %path.display(), prefix = %config.vms.name_prefix, "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from YAML text without touching the filesystem.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to a struct.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Resolve the configuration to use.
    ///
    /// An explicit path must exist. Without one, `config.yaml` in the working
    /// directory is used when present, otherwise built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject values that would make the harness misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.vms.name_prefix.trim().is_empty() {
            return Err(FleetError::InvalidConfig("vms.name_prefix must not be empty".to_string()));
        }
        if self.vms.default_distribution.trim().is_empty() {
            return Err(FleetError::InvalidConfig(
                "vms.default_distribution must not be empty".to_string(),
            ));
        }
        if self.hypervisor.command_timeout_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "hypervisor.command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.hypervisor.discovery_concurrency == 0 {
            return Err(FleetError::InvalidConfig(
                "hypervisor.discovery_concurrency must be at least 1".to_string(),
            ));
        }
        if matches!(self.inventory.group.trim(), "" | "all" | "_meta") {
            return Err(FleetError::InvalidConfig(format!(
                "inventory.group '{}' is reserved or empty",
                self.inventory.group
            )));
        }
        if self.shutdown.poll_interval_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "shutdown.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Override the base directory (used when the config is built in code).
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    /// Directory holding the provisioning shell scripts.
    pub fn scripts_dir(&self) -> PathBuf {
        self.resolve(&self.paths.scripts_dir)
    }

    /// Directory Ansible runs from (picks up `ansible.cfg`).
    pub fn ansible_dir(&self) -> PathBuf {
        self.resolve(&self.paths.ansible_dir)
    }

    /// Directory holding the playbooks.
    pub fn playbooks_dir(&self) -> PathBuf {
        self.resolve(&self.paths.playbooks_dir)
    }

    /// Directory holding base images.
    pub fn image_dir(&self) -> PathBuf {
        expand_home(&self.host.image_dir)
    }

    /// SSH private key with `~` expanded.
    pub fn ssh_key_path(&self) -> PathBuf {
        expand_home(&self.vms.ssh_key_path)
    }
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// =============================================================================
// SECTIONS
// =============================================================================

/// VM naming and distribution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmsConfig {
    /// Prefix shared by every fleet VM name
    pub name_prefix: String,
    /// Distribution assumed for legacy names and bare version specs
    pub default_distribution: String,
    /// Specs (`distro:version`) created when none are given. Bare
    /// versions imply the default distribution.
    #[serde(deserialize_with = "scalar_list")]
    pub default_versions: Vec<String>,
    /// Login user baked into the images
    pub username: String,
    /// SSH private key used to reach the VMs
    pub ssh_key_path: String,
    /// Distributions and their selectable versions
    pub distributions: BTreeMap<String, DistributionConfig>,
}

impl Default for VmsConfig {
    fn default() -> Self {
        let mut distributions = BTreeMap::new();
        distributions.insert(
            "fedora".to_string(),
            DistributionConfig::from_pairs(&[("42", "Fedora 42"), ("41", "Fedora 41"), ("40", "Fedora 40")]),
        );
        distributions.insert(
            "debian".to_string(),
            DistributionConfig::from_pairs(&[("12", "Bookworm"), ("11", "Bullseye")]),
        );
        distributions.insert(
            "ubuntu".to_string(),
            DistributionConfig::from_pairs(&[("24.04", "Noble Numbat"), ("22.04", "Jammy Jellyfish")]),
        );

        Self {
            name_prefix: "snail-test".to_string(),
            default_distribution: "fedora".to_string(),
            default_versions: vec!["fedora:42".to_string()],
            username: "snail".to_string(),
            ssh_key_path: "~/.ssh/snail-test-key".to_string(),
            distributions,
        }
    }
}

/// Selectable versions of one distribution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Version → display name. YAML may key these by number.
    #[serde(deserialize_with = "version_map")]
    pub available_versions: BTreeMap<String, String>,
}

impl DistributionConfig {
    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            available_versions: pairs
                .iter()
                .map(|(v, n)| (v.to_string(), n.to_string()))
                .collect(),
        }
    }
}

/// Accept both `42: Fedora 42` and `"24.04": Noble` style keys.
fn version_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut versions = BTreeMap::new();

    for (key, value) in mapping {
        let key = version_to_string(&key).map_err(D::Error::custom)?;
        let value = scalar_to_string(&value).unwrap_or_default();
        versions.insert(key, value);
    }

    Ok(versions)
}

/// Accept `[42, "debian:12"]`.
fn scalar_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    Vec::<serde_yaml::Value>::deserialize(deserializer)?
        .iter()
        .map(|value| version_to_string(value).map_err(D::Error::custom))
        .collect()
}

/// Versions written as bare floats lose trailing zeros (`22.10` reads as
/// 22.1), so they must be quoted.
fn version_to_string(value: &serde_yaml::Value) -> std::result::Result<String, String> {
    match value {
        serde_yaml::Value::Number(n) if n.is_f64() => Err(format!(
            "dotted version {} must be quoted, e.g. \"22.10\"",
            n
        )),
        other => scalar_to_string(other).ok_or_else(|| "versions must be strings or numbers".to_string()),
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Host-side directories.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Where base images and VM disks live
    pub image_dir: String,
    /// Scratch directory for cloud-init seed ISOs
    pub cloudinit_dir: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            image_dir: "/var/lib/libvirt/images".to_string(),
            cloudinit_dir: "/tmp/snail-test-cloudinit".to_string(),
        }
    }
}

/// Script and playbook locations, relative to the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scripts_dir: String,
    pub ansible_dir: String,
    pub playbooks_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: "scripts".to_string(),
            ansible_dir: "ansible".to_string(),
            playbooks_dir: "ansible/playbooks".to_string(),
        }
    }
}

/// Hypervisor access configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Libvirt connection URI (virsh default when unset)
    pub uri: Option<String>,
    /// Timeout for each virsh invocation
    pub command_timeout_secs: u64,
    /// Prefix virsh with sudo when not root
    pub use_sudo: bool,
    /// Per-VM queries in flight during discovery (1 = sequential)
    pub discovery_concurrency: usize,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            uri: None,
            command_timeout_secs: 30,
            use_sudo: true,
            discovery_concurrency: 1,
        }
    }
}

impl HypervisorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Dynamic inventory configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Name of the single fleet group
    pub group: String,
    /// Python interpreter Ansible uses on the VMs
    pub python_interpreter: String,
    /// Additional fixed group variables
    pub extra_vars: BTreeMap<String, String>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        let mut extra_vars = BTreeMap::new();
        extra_vars.insert("snail_install_path".to_string(), "/opt/snail-core".to_string());
        extra_vars.insert("snail_venv_path".to_string(), "/opt/snail-core/venv".to_string());
        extra_vars.insert(
            "snail_config_path".to_string(),
            "/etc/snail-core/config.yaml".to_string(),
        );

        Self {
            group: "snail_vms".to_string(),
            python_interpreter: "/usr/bin/python3".to_string(),
            extra_vars,
        }
    }
}

/// Graceful shutdown polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Delay between state polls
    pub poll_interval_secs: u64,
    /// Give up waiting after this long
    pub max_wait_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_wait_secs: 60,
        }
    }
}

impl ShutdownConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Ansible invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnsibleConfig {
    /// Playbook runner binary
    pub playbook_command: String,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            playbook_command: "ansible-playbook".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vms.name_prefix, "snail-test");
        assert_eq!(config.shutdown.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.shutdown.max_wait(), Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_parsing_with_numeric_version_keys() {
        let yaml = r#"
vms:
  name_prefix: lab
  default_distribution: debian
  default_versions: [12, "ubuntu:24.04"]
  distributions:
    fedora:
      available_versions:
        42: "Fedora 42"
        41: "Fedora 41"
    ubuntu:
      available_versions:
        "24.04": "Noble Numbat"
hypervisor:
  uri: qemu:///system
  command_timeout_secs: 10
"#;

        let config = HarnessConfig::from_yaml(yaml).expect("Failed to parse YAML");

        assert_eq!(config.vms.name_prefix, "lab");
        assert_eq!(config.vms.default_distribution, "debian");
        assert_eq!(config.vms.default_versions, vec!["12", "ubuntu:24.04"]);
        assert_eq!(
            config.vms.distributions["fedora"].available_versions.get("42"),
            Some(&"Fedora 42".to_string())
        );
        assert!(config.vms.distributions["ubuntu"].available_versions.contains_key("24.04"));
        assert_eq!(config.hypervisor.uri.as_deref(), Some("qemu:///system"));
        assert_eq!(config.hypervisor.command_timeout_secs, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.inventory.group, "snail_vms");
        assert_eq!(config.shutdown.max_wait_secs, 60);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = HarnessConfig::from_yaml("").unwrap();
        assert_eq!(config.vms.username, "snail");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = HarnessConfig::default();
        config.vms.name_prefix = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.shutdown.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.hypervisor.discovery_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_reserved_inventory_groups() {
        for group in ["all", "_meta", ""] {
            let mut config = HarnessConfig::default();
            config.inventory.group = group.to_string();
            assert!(
                matches!(config.validate(), Err(FleetError::InvalidConfig(_))),
                "group '{}' accepted",
                group
            );
        }

        let mut config = HarnessConfig::default();
        config.inventory.group = "webservers".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unquoted_dotted_versions_are_rejected() {
        let yaml = "vms:\n  distributions:\n    ubuntu:\n      available_versions:\n        22.10: Kinetic\n";
        let err = HarnessConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("must be quoted"), "{}", err);

        let err = HarnessConfig::from_yaml("vms:\n  default_versions: [22.10]\n").unwrap_err();
        assert!(err.to_string().contains("must be quoted"), "{}", err);

        let yaml = "vms:\n  distributions:\n    ubuntu:\n      available_versions:\n        \"22.10\": Kinetic\n";
        let config = HarnessConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.vms.distributions["ubuntu"].available_versions.get("22.10"),
            Some(&"Kinetic".to_string())
        );
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "paths:\n  scripts_dir: tools\n").unwrap();

        let config = HarnessConfig::load(&path).unwrap();

        assert_eq!(config.scripts_dir(), dir.path().join("tools"));
        assert_eq!(config.playbooks_dir(), dir.path().join("ansible/playbooks"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let result = HarnessConfig::discover(Some(Path::new("/nonexistent/config.yaml")));
        assert!(matches!(result, Err(FleetError::InvalidConfig(_))));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/.ssh/key");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".ssh/key"));
        }
        assert_eq!(expand_home("/abs/key"), PathBuf::from("/abs/key"));
    }
}
