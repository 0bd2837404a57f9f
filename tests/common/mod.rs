//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FiringLog, manual_node};
//!
//! #[tokio::test]
//! async fn test_leader_task() {
//!     let log = FiringLog::new();
//!     let node = manual_node("node-a");
//!     node.manager.register_leader_task(log.task("job", timing)).unwrap();
//!     node.manager.start().await.unwrap();
//!     node.elector.grant();
//! }
//! ```

mod constants;
mod nodes;
mod server;
mod tasks;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use nodes::{lease_node, manual_node, wait_until, FlakyLeaseStore, TestNode};
#[allow(unused_imports)]
pub use server::{test_cli_config, TestService};
#[allow(unused_imports)]
pub use tasks::{Firing, FiringLog};
