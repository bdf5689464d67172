//! Global configuration for testdock
//!
//! Located at `~/.config/testdock/config.toml`. The directory can be moved
//! with `TESTDOCK_CONFIG_DIR`, and a handful of environment variables
//! override individual settings (see [`GlobalConfig::apply_env`]).

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global testdock configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub runtime: RuntimeConfig,
    pub lifecycle: LifecycleConfig,
}

/// Connection settings for the container runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Docker-compatible API socket (unix path, `unix://`, `http://` or `tcp://`)
    pub socket: String,
    /// Request timeout for runtime API calls, in seconds
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: 120,
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// How children of a node are started, reset and torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnPolicy {
    /// One child at a time, in attachment order
    Sequential,
    /// All children at once, joined before the parent call returns
    #[default]
    Parallel,
}

impl std::fmt::Display for SpawnPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Lifecycle engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub spawn: SpawnPolicy,
    /// Delay between two health check attempts
    pub poll_interval_ms: u64,
    /// Health check deadline for containers that don't set their own
    pub health_check_timeout_secs: u64,
    /// Upper bound for draining an image pull
    pub pull_timeout_secs: u64,
    /// Grace period handed to the runtime on stop and restart
    pub stop_grace_secs: u32,
    /// Forward container output into the log while containers run
    pub forward_logs: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            spawn: SpawnPolicy::Parallel,
            poll_interval_ms: 1000,
            health_check_timeout_secs: 30,
            pull_timeout_secs: 600,
            stop_grace_secs: 5,
            forward_logs: false,
        }
    }
}

impl LifecycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

impl GlobalConfig {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(
            "Loaded config from {:?}: spawn={}, socket={}",
            path,
            config.lifecycle.spawn,
            config.runtime.socket
        );

        Ok(config)
    }

    /// Apply overrides from the environment.
    ///
    /// - `DOCKER_HOST` replaces the runtime socket
    /// - `TESTDOCK_SPAWN_SEQUENTIAL` (`1`/`true`) forces sequential spawning
    /// - `TESTDOCK_VERBOSE` (`1`/`true`) enables container log forwarding
    ///
    /// The lookup is injected so tests don't have to touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOCKER_HOST").filter(|h| !h.is_empty()) {
            self.runtime.socket = host;
        }
        if let Some(v) = lookup("TESTDOCK_SPAWN_SEQUENTIAL") {
            if is_truthy(&v) {
                self.lifecycle.spawn = SpawnPolicy::Sequential;
            }
        }
        if let Some(v) = lookup("TESTDOCK_VERBOSE") {
            if is_truthy(&v) {
                self.lifecycle.forward_logs = true;
            }
        }
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.lifecycle.health_check_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.health_check_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.lifecycle.pull_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.pull_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.runtime.socket.is_empty() {
            return Err(ConfigError::Invalid("runtime.socket is empty".to_string()));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TESTDOCK_CONFIG_DIR") {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        let dirs = ProjectDirs::from("", "", "testdock").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.lifecycle.spawn, SpawnPolicy::Parallel);
        assert_eq!(config.lifecycle.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.lifecycle.health_check_timeout(), Duration::from_secs(30));
        assert_eq!(config.lifecycle.stop_grace_secs, 5);
        assert!(!config.lifecycle.forward_logs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
socket = "unix:///run/user/1000/podman/podman.sock"

[lifecycle]
spawn = "sequential"
poll_interval_ms = 250
pull_timeout_secs = 60
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.runtime.socket,
            "unix:///run/user/1000/podman/podman.sock"
        );
        assert_eq!(config.runtime.timeout_secs, 120);
        assert_eq!(config.lifecycle.spawn, SpawnPolicy::Sequential);
        assert_eq!(config.lifecycle.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.lifecycle.pull_timeout(), Duration::from_secs(60));
        // unspecified keys keep their defaults
        assert_eq!(config.lifecycle.health_check_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[lifecycle\nspawn = ").unwrap();

        let err = GlobalConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCKER_HOST", "tcp://127.0.0.1:2375"),
            ("TESTDOCK_SPAWN_SEQUENTIAL", "true"),
            ("TESTDOCK_VERBOSE", "1"),
        ]);

        let mut config = GlobalConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.runtime.socket, "tcp://127.0.0.1:2375");
        assert_eq!(config.lifecycle.spawn, SpawnPolicy::Sequential);
        assert!(config.lifecycle.forward_logs);
    }

    #[test]
    fn test_env_overrides_ignore_falsy_values() {
        let mut config = GlobalConfig::default();
        config.apply_env(|key| match key {
            "TESTDOCK_SPAWN_SEQUENTIAL" => Some("0".to_string()),
            "DOCKER_HOST" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.lifecycle.spawn, SpawnPolicy::Parallel);
        assert_eq!(config.runtime.socket, default_docker_socket());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = GlobalConfig::default();
        config.lifecycle.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_pull_timeout() {
        let mut config = GlobalConfig::default();
        config.lifecycle.pull_timeout_secs = 0;
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("pull_timeout_secs"), "{}", msg),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
