//! Container nodes of the resource tree

use crate::health::{self, HealthCheck, RunningCheck};
use crate::logging::CONTAINER_LOG_TARGET;
use crate::network::{Network, NetworkNode};
use crate::reset::{ResetAction, RestartReset};
use crate::teardown::Teardown;
use crate::{CoreError, Engine, Result};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use testdock_provider::{
    credentials_for_image, ownership_labels, ContainerConfig, ContainerDetails, ContainerId,
    ContainerInfo, CreateRequest, HostConfig, LogConfig, ProviderError, RegistryAuth,
    RemoveOptions,
};
use tokio::io::AsyncBufReadExt;

/// Declaration of a container
pub struct ContainerOpts {
    /// Container name, also used to find leftovers of earlier runs
    pub name: String,
    /// Pull the image even when it is present locally
    pub force_pull: bool,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    /// Readiness probe, [`RunningCheck`] when unset
    pub health_check: Option<Arc<dyn HealthCheck>>,
    /// Deadline for the readiness probe, the engine default when unset or zero
    pub health_check_timeout: Option<Duration>,
    /// Reset action, [`RestartReset`] when unset
    pub reset: Option<Arc<dyn ResetAction>>,
}

impl ContainerOpts {
    pub fn new(name: impl Into<String>, config: ContainerConfig) -> Self {
        Self {
            name: name.into(),
            force_pull: false,
            config,
            host_config: HostConfig::default(),
            health_check: None,
            health_check_timeout: None,
            reset: None,
        }
    }

    pub fn force_pull(mut self, force_pull: bool) -> Self {
        self.force_pull = force_pull;
        self
    }

    pub fn host_config(mut self, host_config: HostConfig) -> Self {
        self.host_config = host_config;
        self
    }

    pub fn health_check(mut self, check: impl HealthCheck + 'static) -> Self {
        self.health_check = Some(Arc::new(check));
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    pub fn reset(mut self, action: impl ResetAction + 'static) -> Self {
        self.reset = Some(Arc::new(action));
        self
    }
}

impl std::fmt::Debug for ContainerOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerOpts")
            .field("name", &self.name)
            .field("image", &self.config.image)
            .field("force_pull", &self.force_pull)
            .field("health_check_timeout", &self.health_check_timeout)
            .finish_non_exhaustive()
    }
}

/// Link from a child back to the node it hangs under
#[derive(Clone)]
pub(crate) enum Parent {
    Network(Weak<NetworkNode>),
    Container(Weak<ContainerNode>),
}

#[derive(Default)]
struct ContainerState {
    id: Option<ContainerId>,
    parent: Option<Parent>,
    children: Vec<Container>,
    teardown: Option<Teardown>,
    closed: bool,
    removed: bool,
}

pub(crate) struct ContainerNode {
    engine: Engine,
    name: String,
    config: ContainerConfig,
    host_config: HostConfig,
    force_pull: bool,
    health_check: Arc<dyn HealthCheck>,
    health_check_timeout: Duration,
    reset: Arc<dyn ResetAction>,
    state: Mutex<ContainerState>,
}

/// A container in the resource tree.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Container {
    node: Arc<ContainerNode>,
}

impl Container {
    pub(crate) fn new(engine: Engine, opts: ContainerOpts) -> Self {
        let mut config = opts.config;
        config.labels.extend(ownership_labels());

        let health_check_timeout = opts
            .health_check_timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(engine.settings().health_check_timeout);

        Self {
            node: Arc::new(ContainerNode {
                engine,
                name: opts.name,
                config,
                host_config: opts.host_config,
                force_pull: opts.force_pull,
                health_check: opts.health_check.unwrap_or_else(|| Arc::new(RunningCheck)),
                health_check_timeout,
                reset: opts.reset.unwrap_or_else(|| Arc::new(RestartReset)),
                state: Mutex::new(ContainerState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContainerState> {
        self.node.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn image(&self) -> &str {
        &self.node.config.image
    }

    pub fn engine(&self) -> &Engine {
        &self.node.engine
    }

    /// Runtime id, assigned when the container is created
    pub fn id(&self) -> Option<ContainerId> {
        self.lock().id.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_removed(&self) -> bool {
        self.lock().removed
    }

    pub fn health_check_timeout(&self) -> Duration {
        self.node.health_check_timeout
    }

    /// Direct dependents, in attachment order
    pub fn children(&self) -> Vec<Container> {
        self.lock().children.clone()
    }

    /// The network this container runs in, found through its ancestors
    pub fn network(&self) -> Option<Network> {
        let mut current = self.node.clone();
        loop {
            let parent = current
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .parent
                .clone()?;
            match parent {
                Parent::Network(node) => return node.upgrade().map(Network::from_node),
                Parent::Container(node) => current = node.upgrade()?,
            }
        }
    }

    pub(crate) fn same_node(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Whether `other` sits above this container in the tree
    fn descends_from(&self, other: &Container) -> bool {
        let mut current = self.node.clone();
        loop {
            let parent = current
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .parent
                .clone();
            match parent {
                Some(Parent::Container(node)) => match node.upgrade() {
                    Some(node) if Arc::ptr_eq(&node, &other.node) => return true,
                    Some(node) => current = node,
                    None => return false,
                },
                _ => return false,
            }
        }
    }

    /// Claim `self` as a child of `parent`; fails if it already has one
    pub(crate) fn attach_to(&self, parent: Parent) -> Result<()> {
        let mut state = self.lock();
        if state.parent.is_some() {
            return Err(CoreError::AlreadyAttached(self.name().to_string()));
        }
        state.parent = Some(parent);
        Ok(())
    }

    /// Make `child` depend on this container: it starts after this one is
    /// healthy and closes before it.
    pub fn after(&self, child: &Container) -> Result<()> {
        if self.same_node(child) || self.descends_from(child) {
            return Err(CoreError::Cycle {
                parent: self.name().to_string(),
                child: child.name().to_string(),
            });
        }
        child.attach_to(Parent::Container(Arc::downgrade(&self.node)))?;
        self.lock().children.push(child.clone());
        Ok(())
    }

    fn provider_error(
        &self,
        action: &'static str,
        id: Option<&ContainerId>,
        source: ProviderError,
    ) -> CoreError {
        CoreError::Provider {
            action,
            resource: format!("container {}", self.name()),
            id: id.map(|id| id.0.clone()),
            source,
        }
    }

    /// Inspect the running container
    pub async fn inspect(&self) -> Result<ContainerDetails> {
        let id = self
            .id()
            .ok_or_else(|| CoreError::NotStarted(format!("container {}", self.name())))?;
        self.engine()
            .provider()
            .inspect(&id)
            .await
            .map_err(|source| self.provider_error("inspect", Some(&id), source))
    }

    /// Restart the container in place, keeping its id
    pub async fn restart(&self) -> Result<()> {
        let id = self
            .id()
            .ok_or_else(|| CoreError::NotStarted(format!("container {}", self.name())))?;
        self.engine()
            .provider()
            .restart(&id, self.engine().settings().stop_grace_secs)
            .await
            .map_err(|source| self.provider_error("restart", Some(&id), source))
    }

    /// Create and start this container, wait until it is healthy, then start
    /// its children.
    pub async fn start(&self) -> Result<()> {
        let network = self
            .network()
            .ok_or_else(|| CoreError::NotAttached(self.name().to_string()))?;
        let network_id = network
            .id()
            .ok_or_else(|| CoreError::NotStarted(format!("network {}", network.name())))?;
        let provider = self.engine().provider();

        self.remove_stale().await?;
        self.ensure_image().await?;

        let request = CreateRequest {
            name: self.name().to_string(),
            config: self.node.config.clone(),
            host_config: self.node.host_config.clone(),
            network: network.name().to_string(),
        };
        let id = provider
            .create(&request)
            .await
            .map_err(|source| self.provider_error("create", None, source))?;
        self.lock().id = Some(id.clone());

        provider
            .start(&id)
            .await
            .map_err(|source| self.provider_error("start", Some(&id), source))?;
        {
            let mut state = self.lock();
            state.teardown = Some(Teardown::Container {
                id: id.clone(),
                network: network_id,
            });
            state.closed = false;
            state.removed = false;
        }
        tracing::info!(
            "Started container {} ({}) from {}",
            self.name(),
            id.short(),
            self.image()
        );

        if self.engine().settings().forward_logs {
            self.forward_logs(id);
        }

        self.wait_healthy().await?;

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.start_boxed())
            .await
    }

    pub(crate) fn start_boxed(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(async move { this.start().await })
    }

    /// Run the reset action, wait until healthy again, then reset children
    pub async fn reset(&self) -> Result<()> {
        let id = self
            .id()
            .ok_or_else(|| CoreError::NotStarted(format!("container {}", self.name())))?;

        self.node
            .reset
            .reset(self)
            .await
            .map_err(|e| CoreError::Reset {
                resource: format!("container {}", self.name()),
                id: id.0.clone(),
                reason: e.to_string(),
            })?;
        {
            let mut state = self.lock();
            state.closed = false;
            state.removed = false;
        }

        self.wait_healthy().await?;
        tracing::debug!("Reset container {} ({})", self.name(), id.short());

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.reset_boxed())
            .await
    }

    pub(crate) fn reset_boxed(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(async move { this.reset().await })
    }

    /// Close children, then disconnect and stop this container.
    ///
    /// Does nothing once closed. A container that never started is only
    /// marked closed.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.close_boxed())
            .await?;

        let teardown = self.lock().teardown.clone();
        if let Some(teardown) = teardown {
            teardown
                .run(
                    self.engine().provider(),
                    &format!("container {}", self.name()),
                    self.engine().settings().stop_grace_secs,
                )
                .await?;
        }

        self.lock().closed = true;
        Ok(())
    }

    pub(crate) fn close_boxed(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(async move { this.close().await })
    }

    /// Remove children, then delete this container and its volumes.
    ///
    /// Fails with [`CoreError::NotClosed`] unless closed; does nothing once
    /// removed.
    pub async fn remove(&self) -> Result<()> {
        let (closed, removed, id) = {
            let state = self.lock();
            (state.closed, state.removed, state.id.clone())
        };
        if removed {
            return Ok(());
        }
        if !closed {
            return Err(CoreError::NotClosed(format!("container {}", self.name())));
        }

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.remove_boxed())
            .await?;

        if let Some(id) = id {
            self.engine()
                .provider()
                .remove(&id, RemoveOptions::purge())
                .await
                .map_err(|source| self.provider_error("remove", Some(&id), source))?;
            tracing::info!("Removed container {} ({})", self.name(), id.short());
        }

        self.lock().removed = true;
        Ok(())
    }

    pub(crate) fn remove_boxed(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(async move { this.remove().await })
    }

    async fn wait_healthy(&self) -> Result<()> {
        health::wait_healthy(
            self,
            self.node.health_check.as_ref(),
            self.node.health_check_timeout,
            self.engine().settings().poll_interval,
        )
        .await
    }

    /// Remove leftovers of an earlier run that carry our name.
    ///
    /// Every match is checked before anything is removed, so a foreign
    /// container aborts the start without touching the runtime.
    async fn remove_stale(&self) -> Result<()> {
        let provider = self.engine().provider();
        let existing: Vec<ContainerInfo> = provider
            .list_containers_by_name(self.name())
            .await
            .map_err(|source| self.provider_error("list", None, source))?
            .into_iter()
            .filter(|c| c.name == self.name())
            .collect();

        if let Some(foreign) = existing.iter().find(|c| !c.is_owned()) {
            return Err(CoreError::OwnershipViolation {
                kind: "container",
                name: self.name().to_string(),
                id: foreign.id.0.clone(),
            });
        }

        for stale in existing {
            tracing::warn!(
                "Removing stale container {} ({}, {}, {}) left by an earlier run",
                stale.name,
                stale.id.short(),
                stale.image,
                stale.status
            );
            provider
                .remove(&stale.id, RemoveOptions::purge())
                .await
                .map_err(|source| self.provider_error("remove stale", Some(&stale.id), source))?;
        }
        Ok(())
    }

    /// Pull the image when it is missing locally or a pull is forced
    async fn ensure_image(&self) -> Result<()> {
        let provider = self.engine().provider();
        let image = self.image();

        let present = provider
            .image_exists(image)
            .await
            .map_err(|source| self.provider_error("image lookup", None, source))?;
        if present && !self.node.force_pull {
            return Ok(());
        }

        let timeout = self.engine().settings().pull_timeout;
        tracing::info!("Pulling image {}", image);

        let pull = async {
            let auth = registry_auth(image).await;
            let mut progress = provider.pull(image, auth).await?;
            while let Some(update) = progress.next().await {
                let update = update?;
                if let Some(status) = update.status {
                    tracing::trace!("{}: {}", image, status);
                }
            }
            Ok::<(), ProviderError>(())
        };

        match tokio::time::timeout(timeout, pull).await {
            Ok(Ok(())) => {
                tracing::debug!("Pulled image {}", image);
                Ok(())
            }
            Ok(Err(source)) => Err(CoreError::Provider {
                action: "pull",
                resource: format!("image {}", image),
                id: None,
                source,
            }),
            Err(_) => Err(CoreError::PullTimeout {
                image: image.to_string(),
                timeout,
            }),
        }
    }

    /// Stream the container's output into the log until it exits
    fn forward_logs(&self, id: ContainerId) {
        let provider = self.engine().provider_handle();
        let name = self.name().to_string();

        tokio::spawn(async move {
            let config = LogConfig {
                follow: true,
                stdout: true,
                stderr: true,
                tail: None,
            };
            let logs = match provider.logs(&id, &config).await {
                Ok(logs) => logs,
                Err(e) => {
                    tracing::warn!("Cannot follow logs of {}: {}", name, e);
                    return;
                }
            };

            let mut lines = tokio::io::BufReader::new(logs.stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::info!(target: CONTAINER_LOG_TARGET, container = %name, "{}", line)
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("Log stream of {} ended: {}", name, e);
                        break;
                    }
                }
            }
        });
    }
}

/// Registry credentials for `image`, if any can be found.
///
/// Failures are logged and the pull goes ahead anonymously.
async fn registry_auth(image: &str) -> Option<RegistryAuth> {
    let reference = image.to_string();
    match tokio::task::spawn_blocking(move || credentials_for_image(&reference)).await {
        Ok(Ok(auth)) => auth,
        Ok(Err(e)) => {
            tracing::warn!("Pulling {} without credentials: {}", image, e);
            None
        }
        Err(e) => {
            tracing::warn!("Credential lookup for {} failed: {}", image, e);
            None
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Container")
            .field("name", &self.node.name)
            .field("image", &self.node.config.image)
            .field("id", &state.id)
            .field("children", &state.children.len())
            .field("closed", &state.closed)
            .field("removed", &state.removed)
            .finish()
    }
}
