//! Error types for testdock-core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] testdock_config::ConfigError),

    #[error("{action} failed for {resource} ({}): {source}", .id.as_deref().unwrap_or("no id"))]
    Provider {
        action: &'static str,
        resource: String,
        id: Option<String>,
        source: testdock_provider::ProviderError,
    },

    #[error("{kind} with name {name} already exists ({id}), but wasn't created by testdock, aborting")]
    OwnershipViolation {
        kind: &'static str,
        name: String,
        id: String,
    },

    #[error("cannot remove {0}: it has not been closed")]
    NotClosed(String),

    #[error("container {0} already has a parent")]
    AlreadyAttached(String),

    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("container {0} not added to any network")]
    NotAttached(String),

    #[error("{0} has not been started")]
    NotStarted(String),

    #[error("health check of {resource} ({id}) did not succeed within {timeout:?}: {}", .last_error.as_deref().unwrap_or("no attempt finished"))]
    HealthCheckTimeout {
        resource: String,
        id: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("reset of {resource} ({id}) failed: {reason}")]
    Reset {
        resource: String,
        id: String,
        reason: String,
    },

    #[error("pulling image {image} did not finish within {timeout:?}")]
    PullTimeout { image: String, timeout: Duration },

    #[error("container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String, skip: bool },

    #[error("lifecycle task failed: {0}")]
    TaskJoin(String),
}

impl CoreError {
    /// The runtime could not be reached and the suite asked to be skipped
    /// rather than failed in that case.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable { skip: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
