//! Virsh CLI backend implementation.
//!
//! Every operation shells out to `virsh` with captured output and a bounded
//! timeout. Output is handed back as text; the virsh output format is not a
//! stable contract, so nothing here tries to structure it beyond splitting
//! lines.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::VmState;

/// Default per-call timeout for virsh invocations.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Libvirt hypervisor backend driven through the `virsh` CLI.
#[derive(Debug, Clone)]
pub struct VirshBackend {
    /// Binary to invoke (normally `virsh`)
    program: String,
    /// Optional connection URI passed as `-c`
    uri: Option<String>,
    /// Upper bound for a single invocation
    timeout: Duration,
    /// Prefix invocations with sudo when not running as root
    use_sudo: bool,
}

impl VirshBackend {
    /// Create a backend using the default connection and timeout.
    pub fn new() -> Self {
        Self {
            program: "virsh".to_string(),
            uri: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            use_sudo: true,
        }
    }

    /// Connect to a specific libvirt URI (e.g. `qemu:///system`).
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the sudo prefix.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Override the binary that is invoked.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Build the full argv for a virsh invocation.
    pub fn argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 4);

        if self.use_sudo && !nix::unistd::Uid::effective().is_root() {
            argv.push("sudo".to_string());
        }

        argv.push(self.program.clone());

        if let Some(ref uri) = self.uri {
            argv.push("-c".to_string());
            argv.push(uri.clone());
        }

        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// Run virsh and return its stdout.
    ///
    /// Non-zero exit, spawn failure and timeout each map to their own error
    /// variant. The child is killed if the timeout fires.
    async fn run(&self, args: &[&str]) -> Result<String> {
        let argv = self.argv(args);
        let command_line = argv.join(" ");

        debug!(command = %command_line, "Running hypervisor command");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HypervisorError::SpawnFailed {
                    command: command_line,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command_line, timeout_secs = self.timeout.as_secs(), "Hypervisor command timed out");
                return Err(HypervisorError::Timeout {
                    command: command_line,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HypervisorError::CommandFailed {
                command: command_line,
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for VirshBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for VirshBackend {
    async fn list_domains(&self) -> Result<Vec<String>> {
        let stdout = self.run(&["list", "--all", "--name"]).await?;

        let names: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        debug!(count = names.len(), "Listed domains");
        Ok(names)
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn domain_state(&self, name: &str) -> Result<VmState> {
        let stdout = self.run(&["domstate", name]).await?;
        Ok(VmState::from_virsh(&stdout))
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn domain_addresses(&self, name: &str) -> Result<String> {
        self.run(&["domifaddr", name]).await
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn start(&self, name: &str) -> Result<()> {
        info!("Starting VM");
        self.run(&["start", name]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn shutdown(&self, name: &str) -> Result<()> {
        info!("Requesting graceful shutdown");
        self.run(&["shutdown", name]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %name))]
    async fn destroy(&self, name: &str) -> Result<()> {
        info!("Force stopping VM");
        self.run(&["destroy", name]).await?;
        Ok(())
    }
}
