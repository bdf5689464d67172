//! Reset actions bring a started container back to a clean state in place

use crate::health::{async_probe, sync_probe, Probe, ProbeError};
use crate::Container;
use async_trait::async_trait;
use std::future::Future;

#[async_trait]
pub trait ResetAction: Send + Sync {
    async fn reset(&self, container: &Container) -> std::result::Result<(), ProbeError>;
}

/// Restart the container without recreating it; its id is kept
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartReset;

#[async_trait]
impl ResetAction for RestartReset {
    async fn reset(&self, container: &Container) -> std::result::Result<(), ProbeError> {
        container.restart().await?;
        Ok(())
    }
}

/// Caller-supplied reset, e.g. truncating tables instead of restarting
pub struct CustomReset {
    action: Probe,
}

impl CustomReset {
    pub fn new<F, E>(action: F) -> Self
    where
        F: Fn() -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<ProbeError>,
    {
        Self {
            action: sync_probe(action),
        }
    }

    pub fn from_async<F, Fut, E>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<ProbeError>,
    {
        Self {
            action: async_probe(action),
        }
    }
}

impl std::fmt::Debug for CustomReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomReset").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResetAction for CustomReset {
    async fn reset(&self, _container: &Container) -> std::result::Result<(), ProbeError> {
        (self.action)().await
    }
}
