//! Teardown descriptors recorded at start and run at close

use crate::{CoreError, Result};
use testdock_provider::{ContainerId, ContainerProvider, NetworkId};

/// What has to happen on the runtime to take a started node down
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Detach the container from its network, then stop it
    Container { id: ContainerId, network: NetworkId },
    /// Remove the network
    Network { id: NetworkId },
}

impl Teardown {
    pub(crate) async fn run(
        &self,
        provider: &dyn ContainerProvider,
        resource: &str,
        stop_grace_secs: u32,
    ) -> Result<()> {
        match self {
            Teardown::Container { id, network } => {
                provider
                    .disconnect(network, id, true)
                    .await
                    .map_err(|source| CoreError::Provider {
                        action: "disconnect",
                        resource: resource.to_string(),
                        id: Some(id.0.clone()),
                        source,
                    })?;
                provider
                    .stop(id, stop_grace_secs)
                    .await
                    .map_err(|source| CoreError::Provider {
                        action: "stop",
                        resource: resource.to_string(),
                        id: Some(id.0.clone()),
                        source,
                    })?;
                tracing::debug!(name = resource, id = %id.short(), "container stopped");
            }
            Teardown::Network { id } => {
                provider
                    .remove_network(id)
                    .await
                    .map_err(|source| CoreError::Provider {
                        action: "remove network",
                        resource: resource.to_string(),
                        id: Some(id.0.clone()),
                        source,
                    })?;
                tracing::debug!(name = resource, id = %id, "network removed");
            }
        }
        Ok(())
    }
}
