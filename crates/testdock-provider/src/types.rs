//! Common types for container providers

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Label key applied to every resource testdock creates
pub const OWNER_LABEL: &str = "owner";
/// Value of [`OWNER_LABEL`] marking a resource as ours
pub const OWNER_VALUE: &str = "testdock";

/// Labels carrying the ownership marker
pub fn ownership_labels() -> HashMap<String, String> {
    HashMap::from([(OWNER_LABEL.to_string(), OWNER_VALUE.to_string())])
}

/// Whether a label set carries the ownership marker
pub fn is_owned(labels: &HashMap<String, String>) -> bool {
    labels.get(OWNER_LABEL).map(|v| v.as_str()) == Some(OWNER_VALUE)
}

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        if self.0.len() > 12 {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Network ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NetworkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Container provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Docker,
    Podman,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Creation configuration for a container (what runs)
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Image to use
    pub image: String,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Entrypoint override
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Allocate TTY
    pub tty: bool,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }
}

/// Runtime configuration for a container (how it is hosted)
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Volume mounts
    pub mounts: Vec<MountConfig>,
    /// Port mappings
    pub ports: Vec<PortConfig>,
    /// Extra `/etc/hosts` entries (`host:ip`)
    pub extra_hosts: Vec<String>,
    /// Privileged mode
    pub privileged: bool,
    /// Capabilities to add
    pub cap_add: Vec<String>,
    /// Capabilities to drop
    pub cap_drop: Vec<String>,
    /// Security options
    pub security_opt: Vec<String>,
}

impl HostConfig {
    /// Publish `container_port/tcp` on `host_port` (None for auto-assign)
    pub fn with_port(mut self, container_port: u16, host_port: Option<u16>) -> Self {
        self.ports.push(PortConfig {
            host_port,
            container_port,
            protocol: "tcp".to_string(),
            host_ip: None,
        });
        self
    }
}

/// Everything the runtime needs to create one container
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Container name
    pub name: String,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    /// Network (by name) the container joins on creation
    pub network: String,
}

/// Mount configuration
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount type (bind, volume, tmpfs)
    pub mount_type: MountType,
    /// Source path or volume name
    pub source: String,
    /// Target path in container
    pub target: String,
    /// Read-only
    pub read_only: bool,
}

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
            Self::Volume => write!(f, "volume"),
            Self::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// Port configuration
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Host port (None for auto-assign)
    pub host_port: Option<u16>,
    /// Container port
    pub container_port: u16,
    /// Protocol (tcp/udp)
    pub protocol: String,
    /// Host IP to bind to
    pub host_ip: Option<String>,
}

/// Options for removing a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container first if it is running
    pub force: bool,
    /// Remove anonymous volumes attached to it
    pub volumes: bool,
}

impl RemoveOptions {
    /// Force removal including volumes, used for every removal testdock performs
    pub fn purge() -> Self {
        Self {
            force: true,
            volumes: true,
        }
    }
}

/// Basic container info for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    /// Check if this container was created by testdock
    pub fn is_owned(&self) -> bool {
        is_owned(&self.labels)
    }
}

/// Detailed container information
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub running: bool,
    pub started_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortInfo>,
    pub ip_address: Option<String>,
}

impl ContainerDetails {
    /// Host port published for `container_port`, if any
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .and_then(|p| p.host_port)
    }
}

/// Port information
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// Basic network info for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: NetworkId,
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl NetworkInfo {
    /// Check if this network was created by testdock
    pub fn is_owned(&self) -> bool {
        is_owned(&self.labels)
    }
}

/// Detailed network information
#[derive(Debug, Clone)]
pub struct NetworkDetails {
    pub id: NetworkId,
    pub name: String,
    /// Gateway of the first IPAM configuration, when the driver reports one
    pub gateway: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Registry credentials handed to an image pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

/// One progress message from an image pull
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub status: Option<String>,
    pub progress: Option<String>,
}

/// Progress stream of an image pull; the pull is complete once it is drained
pub type PullStream = Pin<Box<dyn Stream<Item = crate::Result<PullProgress>> + Send>>;

/// Log configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Follow log output
    pub follow: bool,
    /// Show stdout
    pub stdout: bool,
    /// Show stderr
    pub stderr: bool,
    /// Number of lines from end to show
    pub tail: Option<u64>,
}

/// Log stream
pub struct LogStream {
    pub stream: Pin<Box<dyn AsyncRead + Send>>,
}

/// Provider information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub provider_type: ProviderType,
    pub api_version: String,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_marker() {
        assert!(is_owned(&ownership_labels()));

        let foreign = HashMap::from([("owner".to_string(), "someone-else".to_string())]);
        assert!(!is_owned(&foreign));
        assert!(!is_owned(&HashMap::new()));
    }

    #[test]
    fn test_container_status_from_str() {
        assert_eq!(ContainerStatus::from("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from("Exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from("bogus"), ContainerStatus::Unknown);
    }

    #[test]
    fn test_short_id() {
        let id = ContainerId::new("0123456789abcdef");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_host_port_lookup() {
        let details = ContainerDetails {
            id: ContainerId::new("c1"),
            name: "db".to_string(),
            image: "postgres:16".to_string(),
            status: ContainerStatus::Running,
            running: true,
            started_at: None,
            exit_code: None,
            labels: HashMap::new(),
            ports: vec![PortInfo {
                container_port: 5432,
                host_port: Some(49153),
                protocol: "tcp".to_string(),
                host_ip: Some("0.0.0.0".to_string()),
            }],
            ip_address: None,
        };
        assert_eq!(details.host_port(5432), Some(49153));
        assert_eq!(details.host_port(80), None);
    }
}
