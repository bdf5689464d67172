//! Error types for container providers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect to container runtime: {0}")]
    ConnectionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Container runtime error: {0}")]
    RuntimeError(String),
}

impl From<bollard::errors::Error> for ProviderError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            other => Self::RuntimeError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure to resolve registry credentials for an image pull.
///
/// Never fatal: the pull continues unauthenticated.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("docker config unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("registry {0} does not exist in config")]
    UnknownRegistry(String),

    #[error("no password set for registry {0}")]
    MissingSecret(String),
}
