//! Command handlers.
//!
//! Handlers write user-facing output to the sink they are given and return
//! an error for anything that should make the process exit non-zero.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use snail_fleet::{
    base_image_path, expand_specs, version_key, BatchReport, CreateRequest, FleetError, FleetSelection,
    HarnessConfig, Operation, PlaybookRequest, ShutdownWait, TargetExpr, VmOutcome, VmRecord, VmSpec,
};

use crate::cli::Command;
use crate::context::{virsh_from_config, HarnessContext};

/// Run one CLI command.
pub async fn run(ctx: &HarnessContext, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Create {
            distro,
            versions,
            specs,
            count,
            memory,
            cpus,
        } => {
            let specs = expand_specs(
                specs.as_deref(),
                versions.as_deref(),
                distro.as_deref(),
                &ctx.config().vms,
            )?;
            create(ctx, specs, count, memory, cpus, out).await
        }
        Command::Destroy { force, target } => destroy(ctx, target.vm.as_deref(), force, out).await,
        Command::Status { json } => status(ctx, json, out).await,
        Command::Start { target } => lifecycle(ctx, Operation::Start, target.vm.as_deref(), out).await,
        Command::Stop { force, target } => {
            lifecycle(ctx, Operation::Stop { force }, target.vm.as_deref(), out).await
        }
        Command::Shutdown { wait, target } => {
            lifecycle(ctx, Operation::Shutdown { wait }, target.vm.as_deref(), out).await
        }
        Command::Ssh { vm_name } => ssh(ctx, &vm_name, out).await,
        Command::Console { vm_name } => console(ctx, &vm_name, out).await,
        Command::Exec {
            command,
            limit,
            no_sudo,
            ignore_errors,
        } => {
            let request = PlaybookRequest::run_command(&command, !no_sudo, ignore_errors);
            let on_failure = if ignore_errors { OnFailure::Ignore } else { OnFailure::Fail };
            playbook(ctx, request, limit.limit.as_deref(), false, on_failure, out).await
        }
        Command::Configure {
            api_endpoint,
            api_key,
            snail_log_level,
            limit,
            verbosity,
        } => {
            let request = PlaybookRequest::configure(
                api_endpoint.as_deref(),
                api_key.as_deref(),
                snail_log_level.as_deref(),
            );
            playbook(ctx, request, limit.limit.as_deref(), verbosity.verbose, OnFailure::Fail, out).await
        }
        Command::Update { force, limit, verbosity } => {
            let request = PlaybookRequest::update(force);
            playbook(ctx, request, limit.limit.as_deref(), verbosity.verbose, OnFailure::Fail, out).await
        }
        Command::Run {
            collectors,
            limit,
            verbosity,
        } => {
            let request = PlaybookRequest::run_snail(&collectors);
            playbook(ctx, request, limit.limit.as_deref(), verbosity.verbose, OnFailure::Fail, out).await
        }
        Command::Check { limit, verbosity } => {
            let request = PlaybookRequest::status();
            playbook(ctx, request, limit.limit.as_deref(), verbosity.verbose, OnFailure::Warn, out).await
        }
        Command::CloudInitStatus { limit } => {
            let request = PlaybookRequest::cloud_init_status();
            playbook(ctx, request, limit.limit.as_deref(), false, OnFailure::Warn, out).await
        }
        Command::ListVersions => list_versions(ctx.config(), out),
        Command::Ips => ips(ctx, out).await,
        Command::Inventory { list: _, host } => inventory(ctx, host.as_deref(), out).await,
        Command::Playbook {
            name,
            extra_vars,
            limit,
            verbosity,
        } => {
            let mut request = PlaybookRequest::named(&name);
            if let Some(raw) = extra_vars {
                request = request.with_extra_vars(parse_extra_vars(&raw)?);
            }
            playbook(ctx, request, limit.limit.as_deref(), verbosity.verbose, OnFailure::Fail, out).await
        }
    }
}

// =============================================================================
// FLEET STATE
// =============================================================================

/// `status`: one row per VM with totals.
pub async fn status(ctx: &HarnessContext, as_json: bool, out: &mut dyn Write) -> Result<()> {
    let fleet = ctx.discovery().list_fleet().await;

    if as_json {
        let rows: Vec<Value> = fleet
            .iter()
            .map(|vm| {
                json!({
                    "name": vm.name,
                    "ip": vm.address.map(|a| a.to_string()),
                    "state": vm.state.as_str(),
                })
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if fleet.is_empty() {
        writeln!(out, "No test VMs found")?;
        return Ok(());
    }

    write_status_table(&fleet, out)?;
    Ok(())
}

fn write_status_table(fleet: &[VmRecord], out: &mut dyn Write) -> std::io::Result<()> {
    let width = fleet.iter().map(|vm| vm.name.len()).max().unwrap_or(0).max("VM NAME".len());

    writeln!(out, "{:<width$}  {:<15}  STATE", "VM NAME", "IP ADDRESS", width = width)?;
    for vm in fleet {
        let ip = vm
            .address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "pending...".to_string());
        writeln!(out, "{:<width$}  {:<15}  {}", vm.name, ip, vm.state, width = width)?;
    }

    let running = fleet.iter().filter(|vm| vm.state.is_running()).count();
    writeln!(out)?;
    writeln!(out, "Total: {} VMs, {} running", fleet.len(), running)
}

/// `ips`: `name:ip` for each VM with an address.
pub async fn ips(ctx: &HarnessContext, out: &mut dyn Write) -> Result<()> {
    for vm in ctx.discovery().list_fleet().await {
        if let Some(address) = vm.address {
            writeln!(out, "{}:{}", vm.name, address)?;
        }
    }
    Ok(())
}

/// `list-versions`: configured versions per distribution, newest first,
/// with base image presence.
pub fn list_versions(config: &HarnessConfig, out: &mut dyn Write) -> Result<()> {
    let image_dir = config.image_dir();

    for (distro, distribution) in &config.vms.distributions {
        let mut versions: Vec<(&String, &String)> = distribution.available_versions.iter().collect();
        versions.sort_by(|a, b| version_key(b.0).cmp(&version_key(a.0)));

        writeln!(out, "{}", distro)?;
        for (version, name) in versions {
            let image = match base_image_path(&image_dir, &VmSpec::new(distro.as_str(), version.as_str())) {
                Ok(path) if path.exists() => "present",
                Ok(_) => "missing",
                Err(_) => "unsupported",
            };
            writeln!(out, "  {:<8} {:<20} base image {}", version, name, image)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "Select versions with: snail-harness create --specs fedora:42,debian:12,ubuntu:24.04")?;
    Ok(())
}

/// `inventory`: the full document, or one host's variables with `host`.
pub async fn inventory(ctx: &HarnessContext, host: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let projector = ctx.projector();

    let document = match host {
        Some(name) => match projector.project_one(name).await {
            Some(vars) => serde_json::to_value(vars)?,
            None => json!({}),
        },
        None => serde_json::to_value(projector.project_all().await)?,
    };

    writeln!(out, "{}", serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

// =============================================================================
// LIFECYCLE
// =============================================================================

pub async fn create(
    ctx: &HarnessContext,
    specs: Vec<VmSpec>,
    count: u32,
    memory_mb: u64,
    vcpus: u32,
    out: &mut dyn Write,
) -> Result<()> {
    let names: Vec<String> = specs.iter().map(ToString::to_string).collect();
    writeln!(out, "VM specs: {}", names.join(", "))?;
    writeln!(out, "VMs per version: {}", count)?;

    let report = ctx
        .orchestrator()
        .create(CreateRequest {
            specs,
            count_per_spec: count,
            memory_mb,
            vcpus,
        })
        .await?;

    for spec in &report.acquired_images {
        writeln!(out, "Downloaded base image for {}", spec)?;
    }
    writeln!(out, "✓ {} test VMs exist", report.fleet_size)?;
    writeln!(out, "VMs may take a few minutes to boot and get IP addresses.")?;
    Ok(())
}

/// `start`, `stop` and `shutdown`.
pub async fn lifecycle(
    ctx: &HarnessContext,
    op: Operation,
    vm: Option<&str>,
    out: &mut dyn Write,
) -> Result<()> {
    let target = TargetExpr::from_arg(vm);
    let orchestrator = ctx.orchestrator();

    if let Operation::Shutdown { wait: true } = op {
        writeln!(out, "Shutting down VMs; waiting up to {}s", ctx.config().shutdown.max_wait_secs)?;
    }

    let report = orchestrator.apply_until(op, &target, interrupted()).await?;
    finish_batch(&report, out)
}

/// `destroy`, asking for confirmation unless `force`.
pub async fn destroy(ctx: &HarnessContext, vm: Option<&str>, force: bool, out: &mut dyn Write) -> Result<()> {
    let target = TargetExpr::from_arg(vm);

    if !force {
        let selection = FleetSelection::resolve_live(&target, ctx.discovery()).await?;
        if selection.is_empty() {
            writeln!(out, "No test VMs found")?;
            return Ok(());
        }

        for name in selection.names() {
            writeln!(out, "  {}", name)?;
        }
        write!(out, "Destroy {} VM(s) and their disks? [y/N] ", selection.len())?;
        out.flush()?;

        if !confirmed().await? {
            writeln!(out, "Aborted")?;
            return Ok(());
        }
    }

    let report = ctx
        .orchestrator()
        .apply(Operation::Destroy { force: true }, &target)
        .await?;
    finish_batch(&report, out)
}

fn finish_batch(report: &BatchReport, out: &mut dyn Write) -> Result<()> {
    if report.is_empty() {
        writeln!(out, "No test VMs found")?;
        return Ok(());
    }

    write_report(report, out)?;

    let failed = report.failed().count();
    if failed > 0 {
        bail!(
            "{} of {} VMs failed to {}",
            failed,
            report.results.len(),
            report.operation.verb()
        );
    }
    Ok(())
}

fn write_report(report: &BatchReport, out: &mut dyn Write) -> std::io::Result<()> {
    for result in &report.results {
        match &result.outcome {
            VmOutcome::Succeeded => writeln!(out, "✓ {}", result.name)?,
            VmOutcome::Failed(reason) => writeln!(out, "✗ {}: {}", result.name, reason)?,
        }
    }

    match &report.wait {
        Some(ShutdownWait::Completed) => writeln!(out, "All VMs shut down")?,
        Some(ShutdownWait::TimedOut { pending }) => {
            writeln!(out, "Some VMs may still be shutting down: {}", pending.join(", "))?
        }
        Some(ShutdownWait::Interrupted { pending }) => {
            writeln!(out, "Stopped waiting; still shutting down: {}", pending.join(", "))?
        }
        None => {}
    }
    Ok(())
}

/// Completes on Ctrl-C. Never completes if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn confirmed() -> Result<bool> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read confirmation")?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

// =============================================================================
// INTERACTIVE ACCESS
// =============================================================================

/// Look up a running fleet VM by exact name.
async fn running_vm(ctx: &HarnessContext, name: &str) -> Result<VmRecord, FleetError> {
    let selection =
        FleetSelection::resolve_live(&TargetExpr::Named(name.to_string()), ctx.discovery()).await?;

    let member = selection
        .into_members()
        .into_iter()
        .next()
        .ok_or_else(|| FleetError::VmNotFound(name.to_string()))?;
    let record = ctx.discovery().inspect_member(member).await;

    if !record.state.is_running() {
        return Err(FleetError::NotRunning {
            name: record.name,
            state: record.state.to_string(),
        });
    }
    Ok(record)
}

/// Arguments for an SSH session to `address`.
pub fn ssh_argv(config: &HarnessConfig, address: Ipv4Addr) -> Vec<String> {
    vec![
        "ssh".to_string(),
        "-i".to_string(),
        config.ssh_key_path().display().to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        format!("{}@{}", config.vms.username, address),
    ]
}

pub async fn ssh(ctx: &HarnessContext, name: &str, out: &mut dyn Write) -> Result<()> {
    let record = running_vm(ctx, name).await?;
    let address = record
        .address
        .ok_or_else(|| FleetError::NoAddress(record.name.clone()))?;

    writeln!(out, "Connecting to {} ({})...", record.name, address)?;
    out.flush()?;
    exec_replace(ssh_argv(ctx.config(), address))
}

pub async fn console(ctx: &HarnessContext, name: &str, out: &mut dyn Write) -> Result<()> {
    let record = running_vm(ctx, name).await?;

    writeln!(out, "Connecting to console (Ctrl+] to exit)...")?;
    out.flush()?;
    exec_replace(virsh_from_config(ctx.config()).argv(&["console", &record.name]))
}

/// Replace this process with `argv`. Only returns on failure.
fn exec_replace(argv: Vec<String>) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("empty command line"))?;
    info!(program = %program, "Handing terminal over");

    let err = std::process::Command::new(program).args(args).exec();
    Err(err).with_context(|| format!("Failed to execute {}", program))
}

// =============================================================================
// PLAYBOOKS
// =============================================================================

/// What a failed playbook run means for the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Fail,
    Warn,
    Ignore,
}

/// Resolve `--limit` against the live fleet into an Ansible limit.
pub async fn host_limit(ctx: &HarnessContext, limit: Option<&str>) -> Result<Option<String>, FleetError> {
    let target = TargetExpr::from_arg(limit);
    if target == TargetExpr::All {
        return Ok(None);
    }

    let selection = FleetSelection::resolve_live(&target, ctx.discovery()).await?;
    Ok(selection.host_limit())
}

pub async fn playbook(
    ctx: &HarnessContext,
    request: PlaybookRequest,
    limit: Option<&str>,
    verbose: bool,
    on_failure: OnFailure,
    out: &mut dyn Write,
) -> Result<()> {
    let request = request
        .with_limit(host_limit(ctx, limit).await?)
        .with_verbose(verbose);

    writeln!(out, "Running {}", request.playbook)?;
    out.flush()?;

    let succeeded = ctx.dispatcher().dispatch(&request).await?;

    match (succeeded, on_failure) {
        (true, _) => writeln!(out, "✓ {} completed", request.playbook)?,
        (false, OnFailure::Fail) => bail!("{} failed on some VMs", request.playbook),
        (false, OnFailure::Warn) => writeln!(out, "Some VMs may have issues")?,
        (false, OnFailure::Ignore) => writeln!(out, "{} failed on some VMs (ignored)", request.playbook)?,
    }
    Ok(())
}

fn parse_extra_vars(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).context("--extra-vars must be a JSON object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use snail_hypervisor::{MockBackend, VmState};
    use std::sync::Arc;

    fn context(backend: Arc<MockBackend>) -> HarnessContext {
        HarnessContext::with_hypervisor(HarnessConfig::default(), backend)
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_status_table() {
        let backend = Arc::new(MockBackend::new());
        backend.add_running_domain("snail-test-fedora-42-1", "192.168.122.11");
        backend.add_domain("snail-test-fedora-42-2", VmState::ShutOff);

        let mut buf = Vec::new();
        status(&context(backend), false, &mut buf).await.unwrap();
        let text = output(buf);

        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("VM NAME"));
        assert!(lines[1].starts_with("snail-test-fedora-42-2"));
        assert!(lines[1].contains("pending..."));
        assert!(lines[1].ends_with("shut off"));
        assert!(lines[2].contains("192.168.122.11"));
        assert!(text.contains("Total: 2 VMs, 1 running"));
    }

    #[tokio::test]
    async fn test_status_json() {
        let backend = Arc::new(MockBackend::new());
        backend.add_running_domain("snail-test-fedora-42-1", "192.168.122.11");
        backend.add_domain("snail-test-debian-12-1", VmState::Paused);

        let mut buf = Vec::new();
        status(&context(backend), true, &mut buf).await.unwrap();
        let rows: Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(
            rows,
            json!([
                {"name": "snail-test-fedora-42-1", "ip": "192.168.122.11", "state": "running"},
                {"name": "snail-test-debian-12-1", "ip": null, "state": "paused"},
            ])
        );
    }

    #[tokio::test]
    async fn test_status_empty_fleet() {
        let mut buf = Vec::new();
        status(&context(Arc::new(MockBackend::new())), false, &mut buf)
            .await
            .unwrap();
        assert_eq!(output(buf), "No test VMs found\n");
    }

    #[tokio::test]
    async fn test_ips() {
        let backend = Arc::new(MockBackend::new());
        backend.add_running_domain("snail-test-fedora-42-2", "10.0.0.2");
        backend.add_running_domain("snail-test-fedora-42-1", "10.0.0.1");
        backend.add_domain("snail-test-fedora-41-1", VmState::ShutOff);

        let mut buf = Vec::new();
        ips(&context(backend), &mut buf).await.unwrap();

        assert_eq!(
            output(buf),
            "snail-test-fedora-42-2:10.0.0.2\nsnail-test-fedora-42-1:10.0.0.1\n"
        );
    }

    #[tokio::test]
    async fn test_inventory_host_lookup() {
        let backend = Arc::new(MockBackend::new());
        backend.add_running_domain("snail-test-fedora-42-1", "10.0.0.1");
        let ctx = context(backend);

        let mut buf = Vec::new();
        inventory(&ctx, Some("snail-test-fedora-42-1"), &mut buf).await.unwrap();
        let vars: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(vars["ansible_host"], "10.0.0.1");

        let mut buf = Vec::new();
        inventory(&ctx, Some("snail-test-fedora-42-9"), &mut buf).await.unwrap();
        let vars: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(vars, json!({}));
    }

    #[tokio::test]
    async fn test_failed_batch_is_error() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-fedora-42-1", VmState::ShutOff);
        backend.add_domain("snail-test-fedora-42-2", VmState::ShutOff);
        backend.fail_actions_for("snail-test-fedora-42-1");

        let mut buf = Vec::new();
        let result = lifecycle(&context(backend), Operation::Start, None, &mut buf).await;

        assert!(result.is_err());
        let text = output(buf);
        assert!(text.contains("✓ snail-test-fedora-42-2"));
        assert!(text.contains("✗ snail-test-fedora-42-1"));
    }

    #[tokio::test]
    async fn test_ssh_requires_running_vm() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-fedora-42-1", VmState::ShutOff);
        let ctx = context(backend);

        let err = running_vm(&ctx, "snail-test-fedora-42-1").await.unwrap_err();
        assert!(matches!(err, FleetError::NotRunning { .. }));

        let err = running_vm(&ctx, "snail-test-fedora-42-7").await.unwrap_err();
        assert!(matches!(err, FleetError::VmNotFound(_)));
    }

    #[test]
    fn test_ssh_argv() {
        let config = HarnessConfig::default();
        let argv = ssh_argv(&config, Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"StrictHostKeyChecking=no".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("snail@10.0.0.5"));
    }

    #[tokio::test]
    async fn test_host_limit_resolution() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain("snail-test-fedora-42-1", VmState::Running);
        backend.add_domain("snail-test-debian-12-1", VmState::Running);
        let ctx = context(backend);

        assert_eq!(host_limit(&ctx, None).await.unwrap(), None);
        assert_eq!(host_limit(&ctx, Some("all")).await.unwrap(), None);
        assert_eq!(
            host_limit(&ctx, Some("snail-test-debian-*")).await.unwrap().as_deref(),
            Some("snail-test-debian-12-1")
        );
        assert!(host_limit(&ctx, Some("snail-test-ubuntu-24.04-1")).await.is_err());
    }

    #[test]
    fn test_list_versions_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fedora-cloud-base-41.qcow2"), b"").unwrap();
        let mut config = HarnessConfig::default();
        config.host.image_dir = dir.path().display().to_string();

        let mut buf = Vec::new();
        list_versions(&config, &mut buf).unwrap();
        let text = output(buf);

        let fedora: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "fedora")
            .skip(1)
            .take(3)
            .collect();
        assert!(fedora[0].trim_start().starts_with("42"));
        assert!(fedora[0].ends_with("missing"));
        assert!(fedora[1].ends_with("present"));
        assert!(fedora[2].trim_start().starts_with("40"));
        assert!(text.contains("ubuntu"));
    }

    #[test]
    fn test_extra_vars_must_be_object() {
        assert!(parse_extra_vars(r#"{"cmd": "uptime"}"#).is_ok());
        assert!(parse_extra_vars("[1, 2]").is_err());
    }
}
