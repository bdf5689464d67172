//! Docker registry credential support
//!
//! Parses the Docker CLI config (`$DOCKER_CONFIG/config.json`, defaulting to
//! `~/.docker/config.json`) and invokes credential helpers to get registry
//! authentication for private registries.

use crate::{CredentialError, RegistryAuth};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Docker configuration from ~/.docker/config.json
#[derive(Debug, Deserialize, Default)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(rename = "credsStore")]
    pub creds_store: Option<String>,
    #[serde(rename = "credHelpers", default)]
    pub cred_helpers: HashMap<String, String>,
}

/// Auth entry in the auths section
#[derive(Debug, Deserialize, Default)]
pub struct AuthEntry {
    /// Base64-encoded "username:password"
    pub auth: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Response from credential helper
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

impl DockerConfig {
    /// Location of the Docker CLI config
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        Some(dirs::home_dir()?.join(".docker/config.json"))
    }

    /// Load Docker config from its default location
    pub fn load() -> Result<Self, CredentialError> {
        let path = Self::config_path().ok_or_else(|| {
            CredentialError::ConfigUnavailable("cannot determine home directory".to_string())
        })?;
        Self::load_from(&path)
    }

    /// Load Docker config from a specific file
    pub fn load_from(path: &Path) -> Result<Self, CredentialError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CredentialError::ConfigUnavailable(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CredentialError::ConfigUnavailable(format!("{}: {}", path.display(), e))
        })
    }

    /// Get credential for a specific registry
    pub fn credential(&self, registry: &str) -> Result<RegistryAuth, CredentialError> {
        // Check for registry-specific credential helper first
        if let Some(helper) = self.cred_helpers.get(registry) {
            if let Some(auth) = invoke_credential_helper(helper, registry) {
                return secret_required(registry, auth);
            }
        }

        // Try global credential helper
        if let Some(store) = &self.creds_store {
            if let Some(auth) = invoke_credential_helper(store, registry) {
                return secret_required(registry, auth);
            }
        }

        // Fall back to static auths
        let entry = self
            .auths
            .get(registry)
            .ok_or_else(|| CredentialError::UnknownRegistry(registry.to_string()))?;

        let (username, password) = match &entry.auth {
            Some(auth) => decode_auth(auth).unwrap_or_default(),
            None => (
                entry.username.clone().unwrap_or_default(),
                entry.password.clone().unwrap_or_default(),
            ),
        };

        secret_required(registry, (username, password))
    }
}

fn secret_required(
    registry: &str,
    (username, password): (String, String),
) -> Result<RegistryAuth, CredentialError> {
    if password.is_empty() {
        return Err(CredentialError::MissingSecret(registry.to_string()));
    }
    Ok(RegistryAuth {
        username,
        password,
        server_address: registry.to_string(),
    })
}

/// Invoke a Docker credential helper to get credentials for a registry
fn invoke_credential_helper(store: &str, registry: &str) -> Option<(String, String)> {
    // Helper binary is named "docker-credential-{store}"
    let helper = format!("docker-credential-{}", store);

    let mut child = match Command::new(&helper)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("Failed to spawn credential helper '{}': {}", helper, e);
            return None;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(registry.as_bytes()).is_err() {
            tracing::debug!("Failed to write to credential helper stdin");
            return None;
        }
    }

    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Credential helper failed: {}", e);
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(
            "Credential helper '{}' returned non-zero for registry '{}'",
            helper,
            registry
        );
        return None;
    }

    // Parse JSON response: {"Username": "...", "Secret": "..."}
    match serde_json::from_slice::<CredentialResponse>(&output.stdout) {
        Ok(response) => Some((response.username, response.secret)),
        Err(e) => {
            tracing::debug!("Failed to parse credential helper response: {}", e);
            None
        }
    }
}

/// Decode base64-encoded "username:password" auth string
fn decode_auth(auth: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth)
        .ok()?;
    let decoded_str = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded_str.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Leading path segment of an image reference, read as a registry domain.
///
/// Any reference with at least two segments qualifies ("quay.io/org/img",
/// but also "library/nginx"); single-segment references have no registry.
fn registry_segment(image: &str) -> Option<&str> {
    let image_no_digest = image.split('@').next().unwrap_or(image);
    match image_no_digest.split_once('/') {
        Some((first, rest)) if !first.is_empty() && !rest.is_empty() => Some(first),
        _ => None,
    }
}

/// Resolve registry credentials for an image.
///
/// `Ok(None)` means the reference names no registry. An error means a
/// registry was named but no usable credentials exist for it.
pub fn credentials_for_image(image: &str) -> Result<Option<RegistryAuth>, CredentialError> {
    let Some(registry) = registry_segment(image) else {
        return Ok(None);
    };
    let config = DockerConfig::load()?;
    config.credential(registry).map(Some)
}
