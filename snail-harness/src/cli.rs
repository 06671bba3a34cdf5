//! Command-line argument parsing.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// snail-harness - test VM fleet management for snail-core
#[derive(Parser, Debug)]
#[command(name = "snail-harness")]
#[command(about = "Create, manage and test snail-core across a fleet of VMs")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to ./config.yaml, then built-in defaults)
    #[arg(short, long, global = true, env = "SNAIL_HARNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create test VMs for the given distributions and versions
    Create {
        /// Distribution used with --versions (defaults to the configured one)
        #[arg(short, long)]
        distro: Option<String>,

        /// Comma-separated versions, e.g. 42,41
        #[arg(short = 'V', long)]
        versions: Option<String>,

        /// Comma-separated distro:version specs, e.g. fedora:42,debian:12
        #[arg(short, long)]
        specs: Option<String>,

        /// VMs per version
        #[arg(short = 'n', long, default_value_t = 5)]
        count: u32,

        /// Memory per VM in MiB
        #[arg(short, long, default_value_t = 2048)]
        memory: u64,

        /// vCPUs per VM
        #[arg(long, default_value_t = 2)]
        cpus: u32,
    },

    /// Destroy test VMs and their disks
    Destroy {
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        target: VmTarget,
    },

    /// Show the state of every test VM
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start test VMs
    Start {
        #[command(flatten)]
        target: VmTarget,
    },

    /// Stop test VMs
    Stop {
        /// Power off immediately instead of a graceful shutdown
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        target: VmTarget,
    },

    /// Gracefully shut down test VMs without deleting them
    Shutdown {
        /// Wait until every VM is shut off
        #[arg(short, long)]
        wait: bool,

        #[command(flatten)]
        target: VmTarget,
    },

    /// SSH into a VM
    Ssh {
        vm_name: String,
    },

    /// Attach to a VM's serial console
    Console {
        vm_name: String,
    },

    /// Execute a shell command on the VMs
    Exec {
        command: String,

        #[command(flatten)]
        limit: HostLimit,

        /// Don't run as root
        #[arg(long)]
        no_sudo: bool,

        /// Don't fail when the command fails on some VMs
        #[arg(long)]
        ignore_errors: bool,
    },

    /// Update snail-core configuration on the VMs
    Configure {
        #[arg(long)]
        api_endpoint: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        /// snail-core log level
        #[arg(long, value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
        snail_log_level: Option<String>,

        #[command(flatten)]
        limit: HostLimit,

        #[command(flatten)]
        verbosity: Verbosity,
    },

    /// Update snail-core to the latest version on the VMs
    Update {
        /// Reinstall even if nothing changed
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        limit: HostLimit,

        #[command(flatten)]
        verbosity: Verbosity,
    },

    /// Run `snail run` on the VMs
    Run {
        /// Collectors to run (repeatable)
        #[arg(short = 'C', long = "collectors")]
        collectors: Vec<String>,

        #[command(flatten)]
        limit: HostLimit,

        #[command(flatten)]
        verbosity: Verbosity,
    },

    /// Check snail-core status on the VMs
    Check {
        #[command(flatten)]
        limit: HostLimit,

        #[command(flatten)]
        verbosity: Verbosity,
    },

    /// Show cloud-init status on the VMs
    CloudInitStatus {
        #[command(flatten)]
        limit: HostLimit,
    },

    /// List configured distributions and versions
    ListVersions,

    /// Print `name:ip` for every VM with an address
    Ips,

    /// Print the Ansible dynamic inventory
    Inventory {
        /// Full inventory document
        #[arg(long, conflicts_with = "host")]
        list: bool,

        /// Variables for a single host
        #[arg(long)]
        host: Option<String>,
    },

    /// Run an arbitrary playbook
    Playbook {
        /// Playbook name (`.yaml` is added when missing)
        name: String,

        /// Extra variables as a JSON object
        #[arg(short, long)]
        extra_vars: Option<String>,

        #[command(flatten)]
        limit: HostLimit,

        #[command(flatten)]
        verbosity: Verbosity,
    },
}

/// `--vm` selection for lifecycle commands.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct VmTarget {
    /// VM name or glob pattern (default: every test VM)
    #[arg(long)]
    pub vm: Option<String>,
}

/// `--limit` selection for playbook commands.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct HostLimit {
    /// VM name or glob pattern to limit to
    #[arg(short, long)]
    pub limit: Option<String>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct Verbosity {
    /// Verbose playbook output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_shutdown() {
        let args = Args::try_parse_from(["snail-harness", "shutdown", "--wait", "--vm", "snail-test-fedora-*"]).unwrap();

        match args.command {
            Command::Shutdown { wait, target } => {
                assert!(wait);
                assert_eq!(target.vm.as_deref(), Some("snail-test-fedora-*"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(args.log_level, "warn");
    }

    #[test]
    fn test_parse_create_defaults() {
        let args = Args::try_parse_from(["snail-harness", "create", "--specs", "fedora:42,debian:12"]).unwrap();

        match args.command {
            Command::Create { specs, count, memory, cpus, .. } => {
                assert_eq!(specs.as_deref(), Some("fedora:42,debian:12"));
                assert_eq!(count, 5);
                assert_eq!(memory, 2048);
                assert_eq!(cpus, 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_collectors() {
        let args = Args::try_parse_from([
            "snail-harness", "run", "-C", "cpu", "-C", "memory", "--limit", "snail-test-42-1", "-v",
        ])
        .unwrap();

        match args.command {
            Command::Run { collectors, limit, verbosity } => {
                assert_eq!(collectors, vec!["cpu", "memory"]);
                assert_eq!(limit.limit.as_deref(), Some("snail-test-42-1"));
                assert!(verbosity.verbose);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_inventory_flags_conflict() {
        assert!(Args::try_parse_from(["snail-harness", "inventory", "--list", "--host", "x"]).is_err());
    }
}
