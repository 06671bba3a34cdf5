//! snail-harness entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error};

use snail_fleet::HarnessConfig;
use snail_harness::cli::Args;
use snail_harness::{commands, HarnessContext};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let logging = if args.log_json {
        snail_common::init_logging_json(&args.log_level)
    } else {
        snail_common::init_logging(&args.log_level)
    };
    if let Err(e) = logging {
        eprintln!("{:#}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = HarnessConfig::discover(args.config.as_deref()).context("Failed to load configuration")?;

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        prefix = %config.vms.name_prefix,
        "Configuration loaded"
    );

    let ctx = HarnessContext::from_config(config);
    let mut out = std::io::stdout();
    commands::run(&ctx, args.command, &mut out).await
}
