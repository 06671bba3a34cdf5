//! Ansible dynamic inventory script.
//!
//! Point Ansible at this binary (`inventory = snail-inventory` in
//! `ansible.cfg`). It prints JSON on stdout and exits zero even when the
//! hypervisor is unreachable, in which case the inventory is empty.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use snail_fleet::HarnessConfig;
use snail_harness::{commands, HarnessContext};

#[derive(Parser, Debug)]
#[command(name = "snail-inventory")]
#[command(about = "Ansible dynamic inventory for the snail-core test VMs")]
#[command(version)]
struct Args {
    /// Print the full inventory
    #[arg(long, conflicts_with = "host")]
    list: bool,

    /// Print variables for one host
    #[arg(long)]
    host: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "SNAIL_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (logs go to stderr)
    #[arg(long, default_value = "error")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    snail_common::init_logging(&args.log_level)?;

    let config = HarnessConfig::discover(args.config.as_deref()).context("Failed to load configuration")?;
    let ctx = HarnessContext::from_config(config);

    let host = if args.list { None } else { args.host.as_deref() };

    let mut out = std::io::stdout();
    commands::inventory(&ctx, host, &mut out).await
}
