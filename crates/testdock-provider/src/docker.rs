//! Docker provider implementation using bollard

use crate::{
    ContainerDetails, ContainerId, ContainerInfo, ContainerProvider, ContainerStatus,
    CreateRequest, LogConfig, LogStream, MountType, NetworkDetails, NetworkId, NetworkInfo,
    PortInfo, ProviderError, ProviderInfo, ProviderType, PullProgress, PullStream, RegistryAuth,
    RemoveOptions, Result,
};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::ContainerSummary;
use bollard::network::{
    CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::service::{HostConfig, Mount, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Docker provider using bollard crate
#[derive(Clone)]
pub struct DockerProvider {
    client: Docker,
    provider_type: ProviderType,
    endpoint: String,
}

impl DockerProvider {
    /// Connect to a Docker-compatible API socket and verify it answers
    pub async fn connect(socket: &str, timeout_secs: u64) -> Result<Self> {
        let client = if socket.starts_with("unix://") || socket.starts_with('/') {
            let path = socket.trim_start_matches("unix://");
            Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else if socket.starts_with("tcp://") || socket.starts_with("http://") {
            Docker::connect_with_http(socket, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            // Assume it's a unix socket path
            Docker::connect_with_socket(socket, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        // Test connection
        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        let provider_type = if socket.contains("podman") {
            ProviderType::Podman
        } else {
            ProviderType::Docker
        };

        Ok(Self {
            client,
            provider_type,
            endpoint: socket.to_string(),
        })
    }
}

/// `name` filter matches substrings, so callers post-filter on exact names
fn name_filter(name: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([("name".to_string(), vec![name.to_string()])])
}

fn container_info(c: ContainerSummary) -> ContainerInfo {
    ContainerInfo {
        id: ContainerId::new(c.id.unwrap_or_default()),
        name: c
            .names
            .and_then(|n| n.first().cloned())
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: c.image.unwrap_or_default(),
        status: c
            .state
            .as_deref()
            .map(ContainerStatus::from)
            .unwrap_or(ContainerStatus::Unknown),
        labels: c.labels.unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn list_containers_by_name(&self, name: &str) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all: true,
            filters: name_filter(name),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().map(container_info).collect())
    }

    async fn list_containers_in_network(&self, network: &NetworkId) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("network".to_string(), vec![network.0.clone()])]),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().map(container_info).collect())
    }

    async fn list_networks_by_name(&self, name: &str) -> Result<Vec<NetworkInfo>> {
        let options = ListNetworksOptions {
            filters: name_filter(name),
        };

        let networks = self.client.list_networks(Some(options)).await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkInfo {
                id: NetworkId::new(n.id.unwrap_or_default()),
                name: n.name.unwrap_or_default(),
                labels: n.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let options = ListImagesOptions {
            filters: HashMap::from([("reference".to_string(), vec![image.to_string()])]),
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;
        Ok(!images.is_empty())
    }

    async fn pull(&self, image: &str, auth: Option<RegistryAuth>) -> Result<PullStream> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let credentials = auth.map(|a| DockerCredentials {
            username: Some(a.username),
            password: Some(a.password),
            serveraddress: Some(a.server_address),
            ..Default::default()
        });

        let stream = self
            .client
            .create_image(Some(options), None, credentials)
            .map(|result| match result {
                Ok(info) => match info.error {
                    Some(error) => Err(ProviderError::ImageNotFound(error)),
                    None => Ok(PullProgress {
                        status: info.status,
                        progress: info.progress,
                    }),
                },
                Err(e) => Err(ProviderError::from(e)),
            });

        Ok(Box::pin(stream))
    }

    async fn create(&self, request: &CreateRequest) -> Result<ContainerId> {
        let options = CreateContainerOptions {
            name: request.name.as_str(),
            platform: None,
        };
        let config = &request.config;
        let host = &request.host_config;

        // Build port bindings
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &host.ports {
            let container_port = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings.insert(container_port, Some(vec![binding]));
        }

        // Build mounts
        let mounts: Vec<Mount> = host
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(match m.mount_type {
                    MountType::Bind => bollard::service::MountTypeEnum::BIND,
                    MountType::Volume => bollard::service::MountTypeEnum::VOLUME,
                    MountType::Tmpfs => bollard::service::MountTypeEnum::TMPFS,
                }),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: non_empty(mounts),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            network_mode: Some(request.network.clone()),
            extra_hosts: non_empty(host.extra_hosts.clone()),
            privileged: Some(host.privileged),
            cap_add: non_empty(host.cap_add.clone()),
            cap_drop: non_empty(host.cap_drop.clone()),
            security_opt: non_empty(host.security_opt.clone()),
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            entrypoint: config.entrypoint.clone(),
            env: non_empty(env),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            hostname: config.hostname.clone(),
            tty: Some(config.tty),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await?;

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, grace_secs: u32) -> Result<()> {
        let options = StopContainerOptions {
            t: grace_secs as i64,
        };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn restart(&self, id: &ContainerId, grace_secs: u32) -> Result<()> {
        let options = RestartContainerOptions {
            t: grace_secs as isize,
        };
        self.client.restart_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn disconnect(&self, network: &NetworkId, id: &ContainerId, force: bool) -> Result<()> {
        let options = DisconnectNetworkOptions {
            container: id.0.clone(),
            force,
        };
        self.client.disconnect_network(&network.0, options).await?;
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self
            .client
            .inspect_container(&id.0, None::<InspectContainerOptions>)
            .await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);
        let running = state.and_then(|s| s.running).unwrap_or(false);

        let config = info.config.as_ref();

        // Parse ports
        let mut ports = Vec::new();
        if let Some(network) = &info.network_settings {
            if let Some(port_map) = &network.ports {
                for (container_port, bindings) in port_map {
                    let mut parts = container_port.split('/');
                    let port_num: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                    let protocol = parts.next().unwrap_or("tcp").to_string();

                    if let Some(bindings) = bindings {
                        for binding in bindings {
                            ports.push(PortInfo {
                                container_port: port_num,
                                host_port: binding.host_port.as_ref().and_then(|p| p.parse().ok()),
                                protocol: protocol.clone(),
                                host_ip: binding.host_ip.clone(),
                            });
                        }
                    } else {
                        ports.push(PortInfo {
                            container_port: port_num,
                            host_port: None,
                            protocol,
                            host_ip: None,
                        });
                    }
                }
            }
        }

        // Containers on a user network report their address per network
        let ip_address = info.network_settings.as_ref().and_then(|ns| {
            ns.networks
                .as_ref()
                .and_then(|nets| nets.values().find_map(|n| n.ip_address.clone()))
                .filter(|ip| !ip.is_empty())
                .or_else(|| ns.ip_address.clone().filter(|ip| !ip.is_empty()))
        });

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: id.clone(),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            status,
            running,
            started_at,
            exit_code: state.and_then(|s| s.exit_code),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            ports,
            ip_address,
        })
    }

    async fn remove(&self, id: &ContainerId, options: RemoveOptions) -> Result<()> {
        let options = RemoveContainerOptions {
            force: options.force,
            v: options.volumes,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream> {
        let options = LogsOptions {
            follow: config.follow,
            stdout: config.stdout,
            stderr: config.stderr,
            tail: config
                .tail
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self.client.logs(&id.0, Some(options));
        let reader = LogOutputReader::new(stream);

        Ok(LogStream {
            stream: Box::pin(reader),
        })
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<NetworkId> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };

        let response = self.client.create_network(options).await?;
        if let Some(warning) = response.warning.filter(|w| !w.is_empty()) {
            tracing::warn!("network {}: {}", name, warning);
        }

        response
            .id
            .map(NetworkId::new)
            .ok_or_else(|| ProviderError::RuntimeError(format!("no ID returned for network {}", name)))
    }

    async fn inspect_network(&self, id: &NetworkId) -> Result<NetworkDetails> {
        let network = self
            .client
            .inspect_network(&id.0, None::<InspectNetworkOptions<String>>)
            .await?;

        let gateway = network
            .ipam
            .and_then(|ipam| ipam.config)
            .and_then(|configs| configs.into_iter().find_map(|c| c.gateway))
            .filter(|g| !g.is_empty());

        Ok(NetworkDetails {
            id: id.clone(),
            name: network.name.unwrap_or_default(),
            gateway,
            labels: network.labels.unwrap_or_default(),
        })
    }

    async fn remove_network(&self, id: &NetworkId) -> Result<()> {
        self.client.remove_network(&id.0).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            endpoint: self.endpoint.clone(),
        }
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Reader that converts log output stream to AsyncRead
struct LogOutputReader<S> {
    stream: S,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S> LogOutputReader<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pos: 0,
        }
    }
}

impl<S> AsyncRead for LogOutputReader<S>
where
    S: futures::Stream<Item = std::result::Result<bollard::container::LogOutput, bollard::errors::Error>>
        + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        // If we have buffered data, return it first
        if self.pos < self.buffer.len() {
            let remaining = &self.buffer[self.pos..];
            let to_copy = std::cmp::min(remaining.len(), buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.pos += to_copy;
            return std::task::Poll::Ready(Ok(()));
        }

        self.buffer.clear();
        self.pos = 0;

        match Pin::new(&mut self.stream).poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(output))) => {
                let data = match output {
                    bollard::container::LogOutput::StdOut { message } => message,
                    bollard::container::LogOutput::StdErr { message } => message,
                    bollard::container::LogOutput::StdIn { message } => message,
                    bollard::container::LogOutput::Console { message } => message,
                };
                self.buffer = data.to_vec();

                let to_copy = std::cmp::min(self.buffer.len(), buf.remaining());
                buf.put_slice(&self.buffer[..to_copy]);
                self.pos = to_copy;
                std::task::Poll::Ready(Ok(()))
            }
            std::task::Poll::Ready(Some(Err(e))) => std::task::Poll::Ready(Err(
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )),
            std::task::Poll::Ready(None) => std::task::Poll::Ready(Ok(())),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
