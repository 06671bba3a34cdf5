//! # snail-hypervisor
//!
//! Hypervisor abstraction layer for the snail-core test fleet.
//!
//! The harness never links against libvirt. It talks to the hypervisor the
//! same way an operator would, through `virsh`, and treats the hypervisor as
//! the single source of truth for which VMs exist and what state they are in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Hypervisor Trait               │
//! │  (list_domains, domain_state, start...) │
//! └─────────────────────┬───────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │   VirshBackend    │     │    MockBackend    │
//! │  (virsh process)  │     │    (in-memory)    │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use snail_hypervisor::{Hypervisor, VirshBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = VirshBackend::new().with_uri("qemu:///system");
//!
//!     for name in backend.list_domains().await.unwrap() {
//!         println!("{}: {}", name, backend.domain_state(&name).await.unwrap());
//!     }
//! }
//! ```

pub mod error;
pub mod traits;
pub mod types;
pub mod mock;
pub mod virsh;

pub use error::HypervisorError;
pub use traits::Hypervisor;
pub use types::VmState;
pub use mock::{MockBackend, MockCall};
pub use virsh::{VirshBackend, DEFAULT_COMMAND_TIMEOUT};
