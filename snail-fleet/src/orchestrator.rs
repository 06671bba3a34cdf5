//! Lifecycle orchestration.
//!
//! Applies start/stop/shutdown/destroy to a selection of fleet VMs and
//! drives VM creation. Every batch re-resolves its selection from live
//! discovery, and one VM failing never stops the rest of the batch.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use snail_hypervisor::VmState;

use crate::config::HarnessConfig;
use crate::discovery::FleetDiscovery;
use crate::error::{FleetError, Result};
use crate::provision::{base_image_path, ProvisionPlan, Provisioner, VmSpec};
use crate::selection::{FleetSelection, TargetExpr};

// =============================================================================
// OPERATIONS AND REPORTS
// =============================================================================

/// A lifecycle action applied to each selected VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Start,
    /// Graceful shutdown, or immediate power-off with `force`
    Stop { force: bool },
    /// Graceful shutdown, optionally waiting until everything is stopped
    Shutdown { wait: bool },
    /// Remove the VM and its storage
    Destroy { force: bool },
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop { force: true } => "force stop",
            Operation::Stop { force: false } => "stop",
            Operation::Shutdown { .. } => "shutdown",
            Operation::Destroy { .. } => "destroy",
        }
    }
}

/// Result of one VM's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum VmOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: VmOutcome,
}

/// How a shutdown wait ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ShutdownWait {
    /// Every selected VM reached `shut off`
    Completed,
    /// The wait ceiling passed with VMs still up
    TimedOut { pending: Vec<String> },
    /// The caller cancelled the wait
    Interrupted { pending: Vec<String> },
}

/// Per-VM outcomes of one batch, in selection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub operation: Operation,
    pub results: Vec<VmResult>,
    /// Only set for `Shutdown { wait: true }`
    pub wait: Option<ShutdownWait>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &VmResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == VmOutcome::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &VmResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, VmOutcome::Failed(_)))
    }

    /// True when no VM failed. An expired shutdown wait is reported but does
    /// not count as a failure.
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Parameters for creating VMs.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub specs: Vec<VmSpec>,
    pub count_per_spec: u32,
    pub memory_mb: u64,
    pub vcpus: u32,
}

/// Outcome of a create run.
#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    /// VMs asked for
    pub requested: usize,
    /// Specs whose base image had to be downloaded first
    pub acquired_images: Vec<String>,
    /// Exit code of the create script
    pub script_status: i32,
    /// Fleet VMs observed afterwards
    pub fleet_size: usize,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives lifecycle changes across the fleet.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    discovery: FleetDiscovery,
    provisioner: Arc<dyn Provisioner>,
    config: Arc<HarnessConfig>,
}

impl LifecycleOrchestrator {
    pub fn new(
        discovery: FleetDiscovery,
        provisioner: Arc<dyn Provisioner>,
        config: Arc<HarnessConfig>,
    ) -> Self {
        Self {
            discovery,
            provisioner,
            config,
        }
    }

    pub fn discovery(&self) -> &FleetDiscovery {
        &self.discovery
    }

    /// Apply `op` to every VM `target` resolves to.
    pub async fn apply(&self, op: Operation, target: &TargetExpr) -> Result<BatchReport> {
        self.apply_until(op, target, std::future::pending::<()>()).await
    }

    /// Like [`apply`](Self::apply), but a shutdown wait stops early when
    /// `cancel` completes.
    ///
    /// Errors only for targeting mistakes and missing prerequisites. Per-VM
    /// failures are recorded in the report.
    #[instrument(skip_all, fields(operation = op.verb(), target = %target))]
    pub async fn apply_until<C>(&self, op: Operation, target: &TargetExpr, cancel: C) -> Result<BatchReport>
    where
        C: Future<Output = ()>,
    {
        let selection = FleetSelection::resolve_live(target, &self.discovery).await?;

        if selection.is_empty() {
            info!("No fleet VMs selected");
            return Ok(BatchReport {
                operation: op,
                results: Vec::new(),
                wait: None,
            });
        }

        let names: Vec<String> = selection.names().iter().map(|n| n.to_string()).collect();
        let mut results = Vec::with_capacity(names.len());

        for name in &names {
            let outcome = match op {
                Operation::Start => self.start_vm(name).await,
                Operation::Stop { force: true } => self.force_stop_vm(name).await,
                Operation::Stop { force: false } | Operation::Shutdown { .. } => {
                    self.shutdown_vm(name).await
                }
                Operation::Destroy { force } => match self.provisioner.destroy_vm(name, force).await {
                    Ok(()) => VmOutcome::Succeeded,
                    Err(e @ FleetError::ScriptNotFound(_)) => return Err(e),
                    Err(e) => VmOutcome::Failed(e.to_string()),
                },
            };

            match &outcome {
                VmOutcome::Succeeded => info!(vm_name = %name, "{} succeeded", op.verb()),
                VmOutcome::Failed(reason) => warn!(vm_name = %name, reason = %reason, "{} failed", op.verb()),
            }

            results.push(VmResult {
                name: name.clone(),
                outcome,
            });
        }

        let wait = match op {
            Operation::Shutdown { wait: true } => Some(self.wait_for_stopped(&names, cancel).await),
            _ => None,
        };

        Ok(BatchReport {
            operation: op,
            results,
            wait,
        })
    }

    async fn start_vm(&self, name: &str) -> VmOutcome {
        match self.discovery.hypervisor().start(name).await {
            Ok(()) => VmOutcome::Succeeded,
            Err(e) => self.settle(name, e.to_string(), VmState::Running).await,
        }
    }

    async fn shutdown_vm(&self, name: &str) -> VmOutcome {
        match self.discovery.hypervisor().shutdown(name).await {
            Ok(()) => VmOutcome::Succeeded,
            Err(e) => self.settle(name, e.to_string(), VmState::ShutOff).await,
        }
    }

    async fn force_stop_vm(&self, name: &str) -> VmOutcome {
        match self.discovery.hypervisor().destroy(name).await {
            Ok(()) => VmOutcome::Succeeded,
            Err(e) => self.settle(name, e.to_string(), VmState::ShutOff).await,
        }
    }

    /// An action that errored counts as done if the VM is already where the
    /// action would have put it.
    async fn settle(&self, name: &str, reason: String, wanted: VmState) -> VmOutcome {
        let state = self.discovery.query_state(name).await;
        if state == wanted {
            info!(vm_name = %name, state = %state, "VM already in requested state");
            VmOutcome::Succeeded
        } else {
            VmOutcome::Failed(reason)
        }
    }

    /// Poll until every VM in `names` is shut off, the configured ceiling
    /// passes, or `cancel` completes.
    pub async fn wait_for_stopped<C>(&self, names: &[String], cancel: C) -> ShutdownWait
    where
        C: Future<Output = ()>,
    {
        let poll_interval = self.config.shutdown.poll_interval();
        let max_wait = self.config.shutdown.max_wait();
        let started = Instant::now();
        tokio::pin!(cancel);

        info!(count = names.len(), max_wait_secs = max_wait.as_secs(), "Waiting for VMs to shut down");

        loop {
            let pending = self.still_running(names).await;
            if pending.is_empty() {
                info!("All VMs shut down");
                return ShutdownWait::Completed;
            }

            if started.elapsed() >= max_wait {
                warn!(pending = ?pending, "Timed out waiting for shutdown");
                return ShutdownWait::TimedOut { pending };
            }

            tokio::select! {
                _ = &mut cancel => {
                    warn!(pending = ?pending, "Shutdown wait interrupted");
                    return ShutdownWait::Interrupted { pending };
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn still_running(&self, names: &[String]) -> Vec<String> {
        let mut pending = Vec::new();
        for name in names {
            if !self.discovery.query_state(name).await.is_stopped() {
                pending.push(name.clone());
            }
        }
        pending
    }

    /// Create VMs for `request`.
    ///
    /// Missing base images are downloaded first. The create script's exit
    /// code is not trusted; success means at least one fleet VM exists
    /// afterwards.
    #[instrument(skip(self, request), fields(specs = request.specs.len(), count = request.count_per_spec))]
    pub async fn create(&self, request: CreateRequest) -> Result<CreateReport> {
        if request.specs.is_empty() {
            return Err(FleetError::InvalidSpec("no VM specs given".to_string()));
        }
        if request.count_per_spec == 0 {
            return Err(FleetError::InvalidSpec("count must be at least 1".to_string()));
        }

        let image_dir = self.config.image_dir();
        let mut missing = Vec::new();
        for spec in &request.specs {
            let image = base_image_path(&image_dir, spec)?;
            if !image.exists() {
                warn!(spec = %spec, image = %image.display(), "Base image not found");
                missing.push(spec.clone());
            }
        }

        for spec in &missing {
            info!(spec = %spec, "Downloading base image");
            self.provisioner.acquire_image(spec).await?;
        }

        let plan = ProvisionPlan {
            specs: request.specs.clone(),
            count_per_spec: request.count_per_spec,
            memory_mb: request.memory_mb,
            vcpus: request.vcpus,
            image_dir: image_dir.display().to_string(),
            cloudinit_dir: self.config.host.cloudinit_dir.clone(),
        };

        info!(total = plan.total(), "Creating VMs");
        let script_status = self.provisioner.create_vms(&plan).await?;

        let fleet_size = self.discovery.list_members().await.len();
        if fleet_size == 0 {
            return Err(FleetError::NothingProvisioned);
        }

        info!(fleet_size, "VM creation finished");
        Ok(CreateReport {
            requested: plan.total(),
            acquired_images: missing.iter().map(ToString::to_string).collect(),
            script_status,
            fleet_size,
        })
    }
}
