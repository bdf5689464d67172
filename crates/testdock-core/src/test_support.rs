//! Test support utilities for testdock-core
//!
//! Provides an in-memory [`MockProvider`] so lifecycle behavior can be tested
//! without a Docker daemon. Every call is recorded in order; failures can be
//! injected per operation.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testdock_provider::*;
use tokio::io::AsyncRead;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListContainers { name: String },
    ListNetworkContainers { network: String },
    ListNetworks { name: String },
    ImageExists { image: String },
    Pull { image: String, authenticated: bool },
    Create { name: String, image: String, network: String },
    Start { id: String },
    Stop { id: String },
    Restart { id: String },
    Disconnect { network: String, id: String },
    Inspect { id: String },
    Remove { id: String },
    Logs { id: String },
    CreateNetwork { name: String },
    InspectNetwork { id: String },
    RemoveNetwork { id: String },
    Ping,
}

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    image: String,
    labels: HashMap<String, String>,
    running: bool,
    started: bool,
    network: Option<NetworkId>,
}

#[derive(Debug, Clone)]
struct MockNetwork {
    name: String,
    labels: HashMap<String, String>,
    gateway: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: usize,
    containers: HashMap<ContainerId, MockContainer>,
    networks: HashMap<NetworkId, MockNetwork>,
    images: HashSet<String>,
    failures: HashMap<String, String>,
    stay_stopped: HashSet<String>,
    pull_delay: Option<Duration>,
    omit_gateways: bool,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn container(&self, id: &ContainerId) -> Result<&MockContainer> {
        self.containers
            .get(id)
            .ok_or_else(|| ProviderError::NotFound(format!("container {}", id)))
    }

    fn container_mut(&mut self, id: &ContainerId) -> Result<&mut MockContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("container {}", id)))
    }

    fn info(&self, id: &ContainerId, c: &MockContainer) -> ContainerInfo {
        ContainerInfo {
            id: id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            status: status_of(c),
            labels: c.labels.clone(),
        }
    }
}

fn status_of(c: &MockContainer) -> ContainerStatus {
    match (c.running, c.started) {
        (true, _) => ContainerStatus::Running,
        (false, true) => ContainerStatus::Exited,
        (false, false) => ContainerStatus::Created,
    }
}

fn labels(owned: bool) -> HashMap<String, String> {
    if owned {
        ownership_labels()
    } else {
        HashMap::from([("owner".to_string(), "someone-else".to_string())])
    }
}

/// In-memory container runtime
#[derive(Clone, Default)]
pub struct MockProvider {
    calls: Arc<Mutex<Vec<MockCall>>>,
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call, then fail if a failure was injected for `op`
    fn record(&self, op: &str, call: MockCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.state.lock().unwrap().failures.get(op) {
            Some(msg) => Err(ProviderError::RuntimeError(msg.clone())),
            None => Ok(()),
        }
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Position of the first recording of `call`
    pub fn index_of(&self, call: &MockCall) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == call)
    }

    /// Position of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&MockCall) -> bool) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(pred)
    }

    /// Make every later call of `op` (a trait method name) fail with `msg`
    pub fn fail_on(&self, op: &str, msg: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), msg.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.state.lock().unwrap().failures.remove(op);
    }

    /// Mark an image as present locally
    pub fn seed_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    /// A running container left over from elsewhere, not attached to a network
    pub fn seed_container(&self, name: &str, owned: bool) -> ContainerId {
        self.insert_container(name, owned, None)
    }

    /// A running container left over from elsewhere, attached to `network`
    pub fn seed_container_in(&self, name: &str, owned: bool, network: &NetworkId) -> ContainerId {
        self.insert_container(name, owned, Some(network.clone()))
    }

    fn insert_container(&self, name: &str, owned: bool, network: Option<NetworkId>) -> ContainerId {
        let mut state = self.state.lock().unwrap();
        let id = ContainerId::new(state.next_id(name));
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: name.to_string(),
                image: "seeded:latest".to_string(),
                labels: labels(owned),
                running: true,
                started: true,
                network,
            },
        );
        id
    }

    /// A network left over from elsewhere
    pub fn seed_network(&self, name: &str, owned: bool) -> NetworkId {
        let mut state = self.state.lock().unwrap();
        let id = NetworkId::new(state.next_id(name));
        state.networks.insert(
            id.clone(),
            MockNetwork {
                name: name.to_string(),
                labels: labels(owned),
                gateway: Some("172.30.0.1".to_string()),
            },
        );
        id
    }

    /// Containers named `name` never report running after start
    pub fn keep_stopped(&self, name: &str) {
        self.state.lock().unwrap().stay_stopped.insert(name.to_string());
    }

    /// Flip the running state of the container named `name`
    pub fn set_running(&self, name: &str, running: bool) {
        let mut state = self.state.lock().unwrap();
        state.stay_stopped.remove(name);
        for c in state.containers.values_mut().filter(|c| c.name == name) {
            c.running = running;
        }
    }

    /// Make every pull take `delay` before its first progress message
    pub fn set_pull_delay(&self, delay: Duration) {
        self.state.lock().unwrap().pull_delay = Some(delay);
    }

    /// Networks created from now on report no gateway
    pub fn omit_gateways(&self) {
        self.state.lock().unwrap().omit_gateways = true;
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .any(|c| c.name == name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .any(|c| c.name == name && c.running)
    }

    pub fn network_exists(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .networks
            .values()
            .any(|n| n.name == name)
    }

    pub fn network_is_owned(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .networks
            .values()
            .any(|n| n.name == name && is_owned(&n.labels))
    }
}

/// Reader that is immediately at end of stream
struct EmptyReader;

impl AsyncRead for EmptyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn list_containers_by_name(&self, name: &str) -> Result<Vec<ContainerInfo>> {
        self.record(
            "list_containers_by_name",
            MockCall::ListContainers {
                name: name.to_string(),
            },
        )?;
        let state = self.state.lock().unwrap();
        // substring match, like the runtime's name filter
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.name.contains(name))
            .map(|(id, c)| state.info(id, c))
            .collect())
    }

    async fn list_containers_in_network(&self, network: &NetworkId) -> Result<Vec<ContainerInfo>> {
        self.record(
            "list_containers_in_network",
            MockCall::ListNetworkContainers {
                network: network.0.clone(),
            },
        )?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.network.as_ref() == Some(network))
            .map(|(id, c)| state.info(id, c))
            .collect())
    }

    async fn list_networks_by_name(&self, name: &str) -> Result<Vec<NetworkInfo>> {
        self.record(
            "list_networks_by_name",
            MockCall::ListNetworks {
                name: name.to_string(),
            },
        )?;
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|(_, n)| n.name.contains(name))
            .map(|(id, n)| NetworkInfo {
                id: id.clone(),
                name: n.name.clone(),
                labels: n.labels.clone(),
            })
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(
            "image_exists",
            MockCall::ImageExists {
                image: image.to_string(),
            },
        )?;
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull(&self, image: &str, auth: Option<RegistryAuth>) -> Result<PullStream> {
        self.record(
            "pull",
            MockCall::Pull {
                image: image.to_string(),
                authenticated: auth.is_some(),
            },
        )?;
        let delay = self.state.lock().unwrap().pull_delay;
        let state = self.state.clone();
        let image = image.to_string();

        let progress = futures::stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            state.lock().unwrap().images.insert(image.clone());
            Ok(PullProgress {
                status: Some(format!("Downloaded newer image for {}", image)),
                progress: None,
            })
        });
        Ok(Box::pin(progress))
    }

    async fn create(&self, request: &CreateRequest) -> Result<ContainerId> {
        self.record(
            "create",
            MockCall::Create {
                name: request.name.clone(),
                image: request.config.image.clone(),
                network: request.network.clone(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        if state.containers.values().any(|c| c.name == request.name) {
            return Err(ProviderError::RuntimeError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                request.name
            )));
        }
        let network = state
            .networks
            .iter()
            .find(|(_, n)| n.name == request.network)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("network {}", request.network)))?;

        let id = ContainerId::new(state.next_id(&request.name));
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: request.name.clone(),
                image: request.config.image.clone(),
                labels: request.config.labels.clone(),
                running: false,
                started: false,
                network: Some(network),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record("start", MockCall::Start { id: id.0.clone() })?;
        let mut state = self.state.lock().unwrap();
        let stay_stopped = state.stay_stopped.clone();
        let c = state.container_mut(id)?;
        c.running = !stay_stopped.contains(&c.name);
        c.started = c.running;
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, _grace_secs: u32) -> Result<()> {
        self.record("stop", MockCall::Stop { id: id.0.clone() })?;
        let mut state = self.state.lock().unwrap();
        state.container_mut(id)?.running = false;
        Ok(())
    }

    async fn restart(&self, id: &ContainerId, _grace_secs: u32) -> Result<()> {
        self.record("restart", MockCall::Restart { id: id.0.clone() })?;
        let mut state = self.state.lock().unwrap();
        let stay_stopped = state.stay_stopped.clone();
        let c = state.container_mut(id)?;
        c.running = !stay_stopped.contains(&c.name);
        c.started = true;
        Ok(())
    }

    async fn disconnect(&self, network: &NetworkId, id: &ContainerId, _force: bool) -> Result<()> {
        self.record(
            "disconnect",
            MockCall::Disconnect {
                network: network.0.clone(),
                id: id.0.clone(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        let c = state.container_mut(id)?;
        if c.network.as_ref() == Some(network) {
            c.network = None;
        }
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record("inspect", MockCall::Inspect { id: id.0.clone() })?;
        let state = self.state.lock().unwrap();
        let c = state.container(id)?;
        Ok(ContainerDetails {
            id: id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            status: status_of(c),
            running: c.running,
            started_at: None,
            exit_code: if c.started && !c.running { Some(0) } else { None },
            labels: c.labels.clone(),
            ports: Vec::new(),
            ip_address: c.network.as_ref().map(|_| "172.30.0.2".to_string()),
        })
    }

    async fn remove(&self, id: &ContainerId, _options: RemoveOptions) -> Result<()> {
        self.record("remove", MockCall::Remove { id: id.0.clone() })?;
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("container {}", id)))
    }

    async fn logs(&self, id: &ContainerId, _config: &LogConfig) -> Result<LogStream> {
        self.record("logs", MockCall::Logs { id: id.0.clone() })?;
        self.state.lock().unwrap().container(id)?;
        Ok(LogStream {
            stream: Box::pin(EmptyReader),
        })
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<NetworkId> {
        self.record(
            "create_network",
            MockCall::CreateNetwork {
                name: name.to_string(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        if state.networks.values().any(|n| n.name == name) {
            return Err(ProviderError::RuntimeError(format!(
                "network with name {} already exists",
                name
            )));
        }
        let id = NetworkId::new(state.next_id(name));
        let gateway = if state.omit_gateways {
            None
        } else {
            Some("172.30.0.1".to_string())
        };
        state.networks.insert(
            id.clone(),
            MockNetwork {
                name: name.to_string(),
                labels: labels.clone(),
                gateway,
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, id: &NetworkId) -> Result<NetworkDetails> {
        self.record("inspect_network", MockCall::InspectNetwork { id: id.0.clone() })?;
        let state = self.state.lock().unwrap();
        let n = state
            .networks
            .get(id)
            .ok_or_else(|| ProviderError::NotFound(format!("network {}", id)))?;
        Ok(NetworkDetails {
            id: id.clone(),
            name: n.name.clone(),
            gateway: n.gateway.clone(),
            labels: n.labels.clone(),
        })
    }

    async fn remove_network(&self, id: &NetworkId) -> Result<()> {
        self.record("remove_network", MockCall::RemoveNetwork { id: id.0.clone() })?;
        let mut state = self.state.lock().unwrap();
        if state
            .containers
            .values()
            .any(|c| c.network.as_ref() == Some(id))
        {
            return Err(ProviderError::RuntimeError(format!(
                "network {} has active endpoints",
                id
            )));
        }
        state
            .networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("network {}", id)))
    }

    async fn ping(&self) -> Result<()> {
        self.record("ping", MockCall::Ping)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: ProviderType::Docker,
            api_version: "mock".to_string(),
            endpoint: "mock://".to_string(),
        }
    }
}
