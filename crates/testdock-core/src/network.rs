//! Network nodes, the roots of the resource tree

use crate::container::{Container, Parent};
use crate::teardown::Teardown;
use crate::{CoreError, Engine, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use testdock_provider::{ownership_labels, ContainerInfo, NetworkId, ProviderError, RemoveOptions};

/// Declaration of a network
#[derive(Debug, Clone)]
pub struct NetworkOpts {
    pub name: String,
}

impl NetworkOpts {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Default)]
struct NetworkState {
    id: Option<NetworkId>,
    gateway: Option<String>,
    children: Vec<Container>,
    teardown: Option<Teardown>,
    closed: bool,
    removed: bool,
}

pub(crate) struct NetworkNode {
    engine: Engine,
    name: String,
    state: Mutex<NetworkState>,
}

/// A network every container of a tree is attached to.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Network {
    node: Arc<NetworkNode>,
}

impl Network {
    pub(crate) fn new(engine: Engine, opts: NetworkOpts) -> Self {
        Self::from_node(Arc::new(NetworkNode {
            engine,
            name: opts.name,
            state: Mutex::new(NetworkState::default()),
        }))
    }

    pub(crate) fn from_node(node: Arc<NetworkNode>) -> Self {
        Self { node }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.node.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn engine(&self) -> &Engine {
        &self.node.engine
    }

    /// Runtime id, assigned when the network is created
    pub fn id(&self) -> Option<NetworkId> {
        self.lock().id.clone()
    }

    /// Gateway address reported by the runtime after creation
    pub fn gateway(&self) -> Option<String> {
        self.lock().gateway.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_removed(&self) -> bool {
        self.lock().removed
    }

    pub fn children(&self) -> Vec<Container> {
        self.lock().children.clone()
    }

    /// Attach `child` directly to this network
    pub fn after(&self, child: &Container) -> Result<()> {
        child.attach_to(Parent::Network(Arc::downgrade(&self.node)))?;
        self.lock().children.push(child.clone());
        Ok(())
    }

    fn provider_error(
        &self,
        action: &'static str,
        id: Option<&NetworkId>,
        source: ProviderError,
    ) -> CoreError {
        CoreError::Provider {
            action,
            resource: format!("network {}", self.name()),
            id: id.map(|id| id.0.clone()),
            source,
        }
    }

    /// Create the network, then start every container attached to it
    pub async fn start(&self) -> Result<()> {
        let provider = self.engine().provider();
        self.remove_stale().await?;

        let id = provider
            .create_network(self.name(), &ownership_labels())
            .await
            .map_err(|source| self.provider_error("create", None, source))?;
        {
            let mut state = self.lock();
            state.id = Some(id.clone());
            state.teardown = Some(Teardown::Network { id: id.clone() });
            state.closed = false;
            state.removed = false;
        }

        let details = match provider.inspect_network(&id).await {
            Ok(details) => details,
            Err(source) => {
                let err = self.provider_error("inspect", Some(&id), source);
                if let Err(cleanup) = provider.remove_network(&id).await {
                    tracing::warn!("Failed to remove network {}: {}", self.name(), cleanup);
                }
                self.lock().teardown = None;
                return Err(err);
            }
        };
        match &details.gateway {
            Some(gateway) => tracing::info!(
                "Created network {} ({}) with gateway {}",
                self.name(),
                id,
                gateway
            ),
            None => tracing::warn!("Network {} ({}) reports no gateway", self.name(), id),
        }
        self.lock().gateway = details.gateway;

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.start_boxed())
            .await
    }

    /// Reset every container in the network
    pub async fn reset(&self) -> Result<()> {
        let started = Instant::now();
        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.reset_boxed())
            .await?;
        tracing::info!(
            "Reset network {} in {:.2?}",
            self.name(),
            started.elapsed()
        );
        Ok(())
    }

    /// Close every container, then remove the network itself.
    ///
    /// Does nothing once closed.
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
                    &format!("network {}", self.name()),
                    self.engine().settings().stop_grace_secs,
                )
                .await?;
            tracing::info!("Closed network {}", self.name());
        }

        self.lock().closed = true;
        Ok(())
    }

    /// Remove every container; the network itself went away on close.
    ///
    /// Fails with [`CoreError::NotClosed`] unless closed; does nothing once
    /// removed.
    pub async fn remove(&self) -> Result<()> {
        let (closed, removed) = {
            let state = self.lock();
            (state.closed, state.removed)
        };
        if removed {
            return Ok(());
        }
        if !closed {
            return Err(CoreError::NotClosed(format!("network {}", self.name())));
        }

        let children = self.children();
        self.engine()
            .fan_out(children, |child| child.remove_boxed())
            .await?;

        self.lock().removed = true;
        Ok(())
    }

    /// Remove networks left over from an earlier run under our name.
    ///
    /// Owned containers still attached go first. Nothing is removed unless
    /// every match, including attached containers, carries the ownership
    /// label.
    async fn remove_stale(&self) -> Result<()> {
        let provider = self.engine().provider();
        let stale: Vec<_> = provider
            .list_networks_by_name(self.name())
            .await
            .map_err(|source| self.provider_error("list", None, source))?
            .into_iter()
            .filter(|n| n.name == self.name())
            .collect();

        let mut plan: Vec<(NetworkId, Vec<ContainerInfo>)> = Vec::with_capacity(stale.len());
        for network in stale {
            if !network.is_owned() {
                return Err(CoreError::OwnershipViolation {
                    kind: "network",
                    name: self.name().to_string(),
                    id: network.id.0,
                });
            }

            let attached = provider
                .list_containers_in_network(&network.id)
                .await
                .map_err(|source| self.provider_error("list containers", Some(&network.id), source))?;
            if let Some(foreign) = attached.iter().find(|c| !c.is_owned()) {
                return Err(CoreError::OwnershipViolation {
                    kind: "container",
                    name: foreign.name.clone(),
                    id: foreign.id.0.clone(),
                });
            }
            plan.push((network.id, attached));
        }

        for (network_id, attached) in plan {
            for container in attached {
                tracing::warn!(
                    "Removing stale container {} ({}) from network {}",
                    container.name,
                    container.id.short(),
                    self.name()
                );
                provider
                    .remove(&container.id, RemoveOptions::purge())
                    .await
                    .map_err(|source| CoreError::Provider {
                        action: "remove stale",
                        resource: format!("container {}", container.name),
                        id: Some(container.id.0.clone()),
                        source,
                    })?;
            }

            tracing::warn!(
                "Removing stale network {} ({}) left by an earlier run",
                self.name(),
                network_id
            );
            provider
                .remove_network(&network_id)
                .await
                .map_err(|source| self.provider_error("remove stale", Some(&network_id), source))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Network")
            .field("name", &self.node.name)
            .field("id", &state.id)
            .field("gateway", &state.gateway)
            .field("children", &state.children.len())
            .field("closed", &state.closed)
            .field("removed", &state.removed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider};
    use crate::{ContainerOpts, EngineSettings};
    use testdock_provider::ContainerConfig;

    fn engine() -> (Engine, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new());
        let engine = Engine::new(provider.clone(), EngineSettings::default());
        (engine, provider)
    }

    fn alpine(engine: &Engine, name: &str) -> Container {
        engine.container(ContainerOpts::new(name, ContainerConfig::new("alpine:3.19")))
    }

    #[tokio::test]
    async fn test_start_records_id_and_gateway() {
        let (engine, provider) = engine();
        let network = engine.network(NetworkOpts::new("n1"));

        network.start().await.unwrap();

        let id = network.id().unwrap();
        assert!(!id.0.is_empty());
        assert!(network.gateway().is_some());
        assert!(provider.was_called(&MockCall::CreateNetwork {
            name: "n1".to_string()
        }));
        assert!(provider.network_is_owned("n1"));
    }

    #[tokio::test]
    async fn test_after_rejects_attached_container() {
        let (engine, _) = engine();
        let n1 = engine.network(NetworkOpts::new("n1"));
        let n2 = engine.network(NetworkOpts::new("n2"));
        let c = alpine(&engine, "a");

        n1.after(&c).unwrap();
        assert!(matches!(n2.after(&c), Err(CoreError::AlreadyAttached(_))));
        assert!(n2.children().is_empty());
    }

    #[tokio::test]
    async fn test_missing_gateway_is_tolerated() {
        let (engine, provider) = engine();
        provider.omit_gateways();
        let network = engine.network(NetworkOpts::new("n1"));

        network.start().await.unwrap();

        assert!(network.id().is_some());
        assert!(network.gateway().is_none());
    }

    #[tokio::test]
    async fn test_failed_inspect_removes_new_network() {
        let (engine, provider) = engine();
        provider.fail_on("inspect_network", "driver crashed");
        let network = engine.network(NetworkOpts::new("n1"));

        let err = network.start().await.unwrap_err();

        assert!(err.to_string().contains("driver crashed"));
        let id = network.id().unwrap();
        assert!(provider.was_called(&MockCall::RemoveNetwork { id: id.0 }));
        assert!(!provider.network_exists("n1"));

        // nothing left to tear down
        network.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_owned_network_and_containers_removed() {
        let (engine, provider) = engine();
        let stale_net = provider.seed_network("n1", true);
        let stale_container = provider.seed_container_in("old-app", true, &stale_net);
        let network = engine.network(NetworkOpts::new("n1"));

        network.start().await.unwrap();

        let container_gone = provider
            .index_of(&MockCall::Remove {
                id: stale_container.0.clone(),
            })
            .unwrap();
        let network_gone = provider
            .index_of(&MockCall::RemoveNetwork {
                id: stale_net.0.clone(),
            })
            .unwrap();
        let created = provider
            .index_of(&MockCall::CreateNetwork {
                name: "n1".to_string(),
            })
            .unwrap();
        assert!(container_gone < network_gone);
        assert!(network_gone < created);
        assert_ne!(network.id().unwrap(), stale_net);
    }

    #[tokio::test]
    async fn test_foreign_network_aborts_start() {
        let (engine, provider) = engine();
        let foreign = provider.seed_network("n1", false);
        let network = engine.network(NetworkOpts::new("n1"));

        let err = network.start().await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::OwnershipViolation { kind: "network", ref id, .. } if *id == foreign.0
        ));
        assert!(network.id().is_none());
        assert!(!provider
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::RemoveNetwork { .. } | MockCall::CreateNetwork { .. })));
    }

    #[tokio::test]
    async fn test_foreign_container_in_owned_network_aborts_start() {
        let (engine, provider) = engine();
        let stale_net = provider.seed_network("n1", true);
        let ours = provider.seed_container_in("old-app", true, &stale_net);
        provider.seed_container_in("someone-elses", false, &stale_net);
        let network = engine.network(NetworkOpts::new("n1"));

        let err = network.start().await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::OwnershipViolation { kind: "container", ref name, .. } if name == "someone-elses"
        ));
        assert!(!provider.was_called(&MockCall::Remove { id: ours.0 }));
        assert!(provider.network_exists("n1"));
    }

    #[tokio::test]
    async fn test_close_removes_network_after_children() {
        let (engine, provider) = engine();
        let network = engine.network(NetworkOpts::new("n1"));
        let a = alpine(&engine, "a");
        let b = alpine(&engine, "b");
        network.after(&a).unwrap();
        network.after(&b).unwrap();
        network.start().await.unwrap();

        network.close().await.unwrap();

        let net_id = network.id().unwrap();
        let removed = provider
            .index_of(&MockCall::RemoveNetwork { id: net_id.0 })
            .unwrap();
        for c in [&a, &b] {
            let stopped = provider
                .index_of(&MockCall::Stop {
                    id: c.id().unwrap().0,
                })
                .unwrap();
            assert!(stopped < removed);
            assert!(c.is_closed());
        }
        assert!(network.is_closed());
    }

    #[tokio::test]
    async fn test_close_then_remove_is_idempotent() {
        let (engine, provider) = engine();
        let network = engine.network(NetworkOpts::new("n1"));
        let a = alpine(&engine, "a");
        network.after(&a).unwrap();
        network.start().await.unwrap();

        network.close().await.unwrap();
        network.close().await.unwrap();
        network.remove().await.unwrap();
        let calls = provider.calls().len();
        network.remove().await.unwrap();

        assert_eq!(provider.calls().len(), calls);
        assert!(network.is_removed());
        assert!(a.is_removed());
        assert!(!provider.container_exists("a"));
    }

    #[tokio::test]
    async fn test_remove_open_network_fails() {
        let (engine, provider) = engine();
        let network = engine.network(NetworkOpts::new("n1"));
        let a = alpine(&engine, "a");
        network.after(&a).unwrap();
        network.start().await.unwrap();

        assert!(matches!(
            network.remove().await,
            Err(CoreError::NotClosed(_))
        ));
        assert!(provider.container_exists("a"));
        assert!(!network.is_removed());
    }

    #[tokio::test]
    async fn test_reset_resets_children() {
        let (engine, provider) = engine();
        let network = engine.network(NetworkOpts::new("n1"));
        let a = alpine(&engine, "a");
        let b = alpine(&engine, "b");
        network.after(&a).unwrap();
        a.after(&b).unwrap();
        network.start().await.unwrap();

        network.reset().await.unwrap();

        let restart_a = provider
            .index_of(&MockCall::Restart {
                id: a.id().unwrap().0,
            })
            .unwrap();
        let restart_b = provider
            .index_of(&MockCall::Restart {
                id: b.id().unwrap().0,
            })
            .unwrap();
        assert!(restart_a < restart_b);
    }
}
