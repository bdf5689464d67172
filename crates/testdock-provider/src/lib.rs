//! Container runtime client for testdock
//!
//! This crate provides the [`ContainerProvider`] trait, the narrow set of
//! runtime operations the lifecycle engine consumes, and a Docker-compatible
//! implementation on top of bollard (works for Docker and Podman sockets).

mod docker;
mod docker_auth;
mod error;
mod types;

pub use docker::DockerProvider;
pub use docker_auth::{credentials_for_image, DockerConfig};
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use std::collections::HashMap;
use testdock_config::GlobalConfig;

/// Operations the lifecycle engine needs from a container runtime
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// List containers (running or not) whose name matches `name`
    async fn list_containers_by_name(&self, name: &str) -> Result<Vec<ContainerInfo>>;

    /// List containers (running or not) attached to a network
    async fn list_containers_in_network(&self, network: &NetworkId) -> Result<Vec<ContainerInfo>>;

    /// List networks whose name matches `name`
    async fn list_networks_by_name(&self, name: &str) -> Result<Vec<NetworkInfo>>;

    /// Check whether an image reference is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image; the returned stream must be drained for the pull to finish
    async fn pull(&self, image: &str, auth: Option<RegistryAuth>) -> Result<PullStream>;

    /// Create a container inside a network
    async fn create(&self, request: &CreateRequest) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stop a container, killing it after `grace_secs`
    async fn stop(&self, id: &ContainerId, grace_secs: u32) -> Result<()>;

    /// Restart a container in place
    async fn restart(&self, id: &ContainerId, grace_secs: u32) -> Result<()>;

    /// Disconnect a container from a network
    async fn disconnect(&self, network: &NetworkId, id: &ContainerId, force: bool) -> Result<()>;

    /// Get detailed information about a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Remove a container
    async fn remove(&self, id: &ContainerId, options: RemoveOptions) -> Result<()>;

    /// Get container logs
    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream>;

    /// Create a network
    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<NetworkId>;

    /// Get detailed information about a network
    async fn inspect_network(&self, id: &NetworkId) -> Result<NetworkDetails>;

    /// Remove a network
    async fn remove_network(&self, id: &NetworkId) -> Result<()>;

    /// Check if the provider is available/connected
    async fn ping(&self) -> Result<()>;

    /// Get provider information
    fn info(&self) -> ProviderInfo;
}

/// Create the provider described by the global config (socket or `DOCKER_HOST`)
pub async fn create_default_provider(config: &GlobalConfig) -> Result<DockerProvider> {
    let socket = &config.runtime.socket;

    match DockerProvider::connect(socket, config.runtime.timeout_secs).await {
        Ok(provider) => {
            tracing::debug!("Connected to container runtime at {}", socket);
            Ok(provider)
        }
        Err(e) => {
            let socket_exists = is_unix_socket_path(socket)
                && std::path::Path::new(socket.trim_start_matches("unix://")).exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                socket,
                socket_exists,
                &e,
            )))
        }
    }
}

fn is_unix_socket_path(socket: &str) -> bool {
    socket.starts_with("unix://") || socket.starts_with('/')
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(socket: &str, socket_exists: bool, underlying: &ProviderError) -> String {
    let mut msg = format!("Cannot connect to container runtime at {}\n\n", socket);

    if is_unix_socket_path(socket) && !socket_exists {
        msg.push_str("The API socket was not found. To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
        msg.push_str("For Podman, enable its socket and point DOCKER_HOST at it:\n");
        msg.push_str("  systemctl --user enable --now podman.socket\n");
        msg.push_str("  export DOCKER_HOST=unix://$XDG_RUNTIME_DIR/podman/podman.sock\n");
    } else {
        msg.push_str("The daemon is not responding.\n\n");
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_missing_socket() {
        let msg = format_connection_error(
            "/nonexistent/docker.sock",
            false,
            &ProviderError::ConnectionError("refused".to_string()),
        );
        assert!(msg.contains("/nonexistent/docker.sock"));
        assert!(msg.contains("systemctl enable --now docker"));
        assert!(!msg.contains("refused"));
    }

    #[test]
    fn test_connection_error_unresponsive_daemon() {
        let msg = format_connection_error(
            "tcp://10.0.0.1:2375",
            false,
            &ProviderError::ConnectionError("refused".to_string()),
        );
        assert!(msg.contains("not responding"));
        assert!(msg.contains("refused"));
    }
}
