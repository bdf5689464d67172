//! Image pulls with registry credentials from the Docker CLI config.
//!
//! Lives in its own test binary because it points `DOCKER_CONFIG` and
//! `PATH` at a temporary directory for the whole process.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use testdock_core::test_support::{MockCall, MockProvider};
use testdock_core::{
    ContainerConfig, ContainerOpts, CoreError, Engine, EngineSettings, NetworkOpts,
};

const DOCKER_CONFIG: &str = r#"{
  "auths": {
    "quay.io": { "username": "ci", "password": "secret" }
  },
  "credHelpers": {
    "slow.example": "testdock-slow"
  }
}"#;

/// Write the Docker config and a credential helper that hangs, once per process
fn docker_config() -> &'static tempfile::TempDir {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), DOCKER_CONFIG).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let helper = dir.path().join("docker-credential-testdock-slow");
            std::fs::write(&helper, "#!/bin/sh\nsleep 3\n").unwrap();
            std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.path().display(), path));
        std::env::set_var("DOCKER_CONFIG", dir.path());
        dir
    })
}

/// Start a network holding one container of `image`
async fn start_one(
    provider: &Arc<MockProvider>,
    settings: EngineSettings,
    image: &str,
) -> testdock_core::Result<()> {
    docker_config();
    let name = image.replace(['/', ':', '.'], "-");
    let engine = Engine::new(provider.clone(), settings);
    let network = engine.network(NetworkOpts::new(format!("net-{}", name)));
    network
        .after(&engine.container(ContainerOpts::new(name, ContainerConfig::new(image))))
        .unwrap();
    network.start().await
}

#[tokio::test]
async fn test_known_registry_pulls_with_credentials() {
    let provider = Arc::new(MockProvider::new());

    start_one(&provider, EngineSettings::default(), "quay.io/org/img:1")
        .await
        .unwrap();

    assert!(provider.was_called(&MockCall::Pull {
        image: "quay.io/org/img:1".to_string(),
        authenticated: true,
    }));
}

#[tokio::test]
async fn test_unknown_registry_pulls_anonymously() {
    let provider = Arc::new(MockProvider::new());

    start_one(&provider, EngineSettings::default(), "ghcr.io/org/img:1")
        .await
        .unwrap();

    assert!(provider.was_called(&MockCall::Pull {
        image: "ghcr.io/org/img:1".to_string(),
        authenticated: false,
    }));
    assert!(provider.is_running("ghcr-io-org-img-1"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_hanging_credential_helper_counts_against_pull_timeout() {
    let provider = Arc::new(MockProvider::new());
    let settings = EngineSettings {
        pull_timeout: Duration::from_millis(200),
        ..EngineSettings::default()
    };

    let started = Instant::now();
    let err = start_one(&provider, settings, "slow.example/org/img:1")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::PullTimeout { ref image, .. } if image == "slow.example/org/img:1"
    ));
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert!(!provider
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::Pull { .. })));
}
