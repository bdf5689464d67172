//! Lifecycle engine for ephemeral docker test infrastructure
//!
//! This crate provides:
//! - A tree of networks and containers declared up front, started top-down
//! - Health checks gating every child on its parent's readiness
//! - Reset in place between test cases
//! - Idempotent close and remove, children before parents
//! - Removal of leftovers from earlier runs, guarded by an ownership label
//! - A registry handing out suites by name

mod container;
mod engine;
mod error;
mod health;
mod logging;
mod network;
mod reset;
mod suite;
mod teardown;

pub use container::{Container, ContainerOpts};
pub use engine::{Engine, EngineSettings};
pub use error::*;
pub use health::{CustomCheck, HealthCheck, HttpCheck, ProbeError, RunningCheck};
pub use logging::{init_test_logging, CONTAINER_LOG_TARGET};
pub use network::{Network, NetworkOpts};
pub use reset::{CustomReset, ResetAction, RestartReset};
pub use suite::{Suite, SuiteOpts, SuiteRegistry};

pub use testdock_config::SpawnPolicy;
pub use testdock_provider::{ContainerConfig, ContainerDetails, ContainerId, HostConfig, NetworkId};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
