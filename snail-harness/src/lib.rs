//! # snail-harness
//!
//! Command-line front end for the snail-core test fleet. Two binaries share
//! this library:
//!
//! - `snail-harness`: create, operate and test the fleet
//! - `snail-inventory`: Ansible dynamic inventory script
//!
//! ## Usage
//! ```bash
//! snail-harness create --specs fedora:42,debian:12 --count 2
//! snail-harness status
//! snail-harness exec "uptime" --limit 'snail-test-fedora-*'
//! snail-harness shutdown --wait
//! ```

pub mod cli;
pub mod commands;
pub mod context;

pub use context::HarnessContext;
