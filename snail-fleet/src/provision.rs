//! VM provisioning and teardown.
//!
//! Creating and destroying domains is delegated to shell scripts, and base
//! images are fetched by another script. This module owns the seam to those
//! scripts plus the rules for naming base images.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::config::VmsConfig;
use crate::error::{FleetError, Result};

/// Script that downloads a base image.
pub const IMAGE_SCRIPT: &str = "setup-base-image.sh";
/// Script that creates the VMs.
pub const CREATE_SCRIPT: &str = "create-vms.sh";
/// Script that tears VMs down.
pub const DESTROY_SCRIPT: &str = "destroy-vms.sh";

// =============================================================================
// VM SPECS
// =============================================================================

/// A distribution/version pair to create VMs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmSpec {
    pub distro: String,
    pub version: String,
}

impl VmSpec {
    pub fn new(distro: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            distro: distro.into(),
            version: version.into(),
        }
    }

    /// Parse `distro:version`, or a bare `version` for the default distro.
    pub fn parse(entry: &str, default_distro: &str) -> Result<Self> {
        let entry = entry.trim();
        let (distro, version) = match entry.split_once(':') {
            Some((distro, version)) => (distro.trim(), version.trim()),
            None => (default_distro, entry),
        };

        if distro.is_empty() || version.is_empty() || version.contains('-') {
            return Err(FleetError::InvalidSpec(entry.to_string()));
        }

        Ok(Self::new(distro, version))
    }
}

impl fmt::Display for VmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.distro, self.version)
    }
}

/// Expand the create command's spec options into a spec list.
///
/// Precedence: explicit `specs` (`fedora:42,debian:12`), then `versions`
/// combined with `distro` (or the default distribution), then the configured
/// default specs.
pub fn expand_specs(
    specs: Option<&str>,
    versions: Option<&str>,
    distro: Option<&str>,
    vms: &VmsConfig,
) -> Result<Vec<VmSpec>> {
    let default_distro = vms.default_distribution.as_str();

    let expanded: Vec<VmSpec> = if let Some(specs) = specs {
        split_list(specs)
            .map(|entry| VmSpec::parse(entry, default_distro))
            .collect::<Result<_>>()?
    } else if let Some(versions) = versions {
        let distro = distro.unwrap_or(default_distro);
        split_list(versions)
            .map(|version| VmSpec::parse(&format!("{}:{}", distro, version), default_distro))
            .collect::<Result<_>>()?
    } else {
        vms.default_versions
            .iter()
            .map(|entry| VmSpec::parse(entry, default_distro))
            .collect::<Result<_>>()?
    };

    if expanded.is_empty() {
        return Err(FleetError::InvalidSpec("no VM specs given".to_string()));
    }

    Ok(expanded)
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Path of the base image a spec is cloned from.
pub fn base_image_path(image_dir: &Path, spec: &VmSpec) -> Result<PathBuf> {
    let file = match spec.distro.as_str() {
        "fedora" => format!("fedora-cloud-base-{}.qcow2", spec.version),
        "debian" => format!("debian-cloud-base-{}.qcow2", spec.version),
        "ubuntu" => format!("ubuntu-cloud-base-{}.qcow2", spec.version.replace('.', "_")),
        other => return Err(FleetError::UnknownDistribution(other.to_string())),
    };
    Ok(image_dir.join(file))
}

// =============================================================================
// PROVISIONER
// =============================================================================

/// Everything the create script needs, passed through its environment.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub specs: Vec<VmSpec>,
    pub count_per_spec: u32,
    pub memory_mb: u64,
    pub vcpus: u32,
    pub image_dir: String,
    pub cloudinit_dir: String,
}

impl ProvisionPlan {
    /// Total VMs requested.
    pub fn total(&self) -> usize {
        self.specs.len() * self.count_per_spec as usize
    }

    /// Environment variables understood by the create script.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let specs: Vec<String> = self.specs.iter().map(ToString::to_string).collect();
        vec![
            ("VM_SPECS", specs.join(",")),
            ("VM_COUNT_PER_VERSION", self.count_per_spec.to_string()),
            ("MEMORY_MB", self.memory_mb.to_string()),
            ("VCPUS", self.vcpus.to_string()),
            ("IMAGE_DIR", self.image_dir.clone()),
            ("CLOUDINIT_DIR", self.cloudinit_dir.clone()),
        ]
    }
}

/// Creates and tears down fleet VMs.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Fetch the base image for `spec`.
    async fn acquire_image(&self, spec: &VmSpec) -> Result<()>;

    /// Create the VMs described by `plan`.
    ///
    /// Returns the script's exit code. Provisioning is best-effort and a
    /// non-zero code does not by itself mean nothing was created.
    async fn create_vms(&self, plan: &ProvisionPlan) -> Result<i32>;

    /// Tear down one VM. `force` skips the script's own confirmation.
    async fn destroy_vm(&self, name: &str, force: bool) -> Result<()>;
}

/// Provisioner backed by the harness shell scripts.
///
/// Script output is streamed to the terminal, not captured.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    scripts_dir: PathBuf,
}

impl ScriptProvisioner {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Locate a script, failing if it does not exist.
    pub fn script_path(&self, script: &str) -> Result<PathBuf> {
        let path = self.scripts_dir.join(script);
        if !path.exists() {
            return Err(FleetError::ScriptNotFound(path));
        }
        Ok(path)
    }

    async fn run_script(
        &self,
        script: &str,
        args: &[&str],
        env: &[(&'static str, String)],
    ) -> Result<ExitStatus> {
        let path = self.script_path(script)?;

        info!(script = %path.display(), args = ?args, "Running script");

        let status = Command::new("bash")
            .arg(&path)
            .args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .status()
            .await?;

        Ok(status)
    }
}

#[async_trait]
impl Provisioner for ScriptProvisioner {
    #[instrument(skip(self), fields(distro = %spec.distro, version = %spec.version))]
    async fn acquire_image(&self, spec: &VmSpec) -> Result<()> {
        let status = self
            .run_script(
                IMAGE_SCRIPT,
                &["--distro", &spec.distro, "--version", &spec.version],
                &[],
            )
            .await?;

        if !status.success() {
            return Err(FleetError::ImageAcquisitionFailed {
                distro: spec.distro.clone(),
                version: spec.version.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, plan), fields(total = plan.total()))]
    async fn create_vms(&self, plan: &ProvisionPlan) -> Result<i32> {
        let status = self.run_script(CREATE_SCRIPT, &[], &plan.env()).await?;
        let code = status.code().unwrap_or(-1);

        if code != 0 {
            warn!(code, "Create script exited non-zero; verifying fleet instead");
        }
        Ok(code)
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn destroy_vm(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["--vm", name];
        if force {
            args.push("--force");
        }

        let status = self.run_script(DESTROY_SCRIPT, &args, &[]).await?;

        if !status.success() {
            return Err(FleetError::ScriptFailed {
                script: DESTROY_SCRIPT.to_string(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}
