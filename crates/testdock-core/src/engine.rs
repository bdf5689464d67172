//! Engine - the runtime client plus the settings every lifecycle call obeys

use crate::{Container, ContainerOpts, CoreError, Network, NetworkOpts, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use testdock_config::{GlobalConfig, LifecycleConfig, SpawnPolicy};
use testdock_provider::{create_default_provider, ContainerProvider};
use tokio::task::JoinSet;

/// Settings shared by every node built from one [`Engine`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Sequential or parallel fan-out across siblings
    pub spawn: SpawnPolicy,
    /// Delay between two health check attempts
    pub poll_interval: Duration,
    /// Health check deadline for containers that don't set one
    pub health_check_timeout: Duration,
    /// Upper bound for an image pull
    pub pull_timeout: Duration,
    /// Grace period for stop and restart, in seconds
    pub stop_grace_secs: u32,
    /// Stream container output into the log
    pub forward_logs: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for EngineSettings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            spawn: config.spawn,
            poll_interval: config.poll_interval(),
            health_check_timeout: config.health_check_timeout(),
            pull_timeout: config.pull_timeout(),
            stop_grace_secs: config.stop_grace_secs,
            forward_logs: config.forward_logs,
        }
    }
}

impl EngineSettings {
    pub fn sequential(mut self) -> Self {
        self.spawn = SpawnPolicy::Sequential;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.spawn = SpawnPolicy::Parallel;
        self
    }
}

struct EngineInner {
    provider: Arc<dyn ContainerProvider>,
    settings: EngineSettings,
}

/// Handle to a runtime client and its lifecycle settings.
///
/// Cheap to clone; every [`Network`] and [`Container`] keeps one.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(provider: Arc<dyn ContainerProvider>, settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner { provider, settings }),
        }
    }

    /// Connect to the runtime described by the global config
    pub async fn connect(config: &GlobalConfig) -> Result<Self> {
        let provider = create_default_provider(config)
            .await
            .map_err(|e| CoreError::RuntimeUnavailable {
                reason: e.to_string(),
                skip: false,
            })?;
        Ok(Self::new(
            Arc::new(provider),
            EngineSettings::from(&config.lifecycle),
        ))
    }

    pub fn provider(&self) -> &dyn ContainerProvider {
        self.inner.provider.as_ref()
    }

    pub(crate) fn provider_handle(&self) -> Arc<dyn ContainerProvider> {
        self.inner.provider.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Declare a network; nothing happens on the runtime until it is started
    pub fn network(&self, opts: NetworkOpts) -> Network {
        Network::new(self.clone(), opts)
    }

    /// Declare a container; nothing happens on the runtime until it is started
    pub fn container(&self, opts: ContainerOpts) -> Container {
        Container::new(self.clone(), opts)
    }

    /// Run `op` for every node according to the spawn policy.
    ///
    /// In parallel mode every task is joined before returning, even after a
    /// failure; the first error observed is returned.
    pub(crate) async fn fan_out<T, F>(&self, nodes: Vec<T>, op: F) -> Result<()>
    where
        F: Fn(T) -> BoxFuture<'static, Result<()>>,
    {
        match self.settings().spawn {
            SpawnPolicy::Sequential => {
                for node in nodes {
                    op(node).await?;
                }
                Ok(())
            }
            SpawnPolicy::Parallel => {
                let mut tasks = JoinSet::new();
                for node in nodes {
                    tasks.spawn(op(node));
                }

                let mut first_error = None;
                while let Some(joined) = tasks.join_next().await {
                    let outcome = joined
                        .map_err(|e| CoreError::TaskJoin(e.to_string()))
                        .and_then(|r| r);
                    if let Err(e) = outcome {
                        if first_error.is_none() {
                            first_error = Some(e);
                        } else {
                            tracing::debug!("additional sibling failure: {}", e);
                        }
                    }
                }

                match first_error {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider().info().endpoint)
            .field("settings", self.settings())
            .finish()
    }
}
