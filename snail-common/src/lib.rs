//! # snail-common
//!
//! Shared utilities for the snail-core test harness binaries.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use snail_common::init_logging;
//!
//! init_logging("warn").unwrap();
//! tracing::info!(vm_name = "snail-test-fedora-42-1", "VM started");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
