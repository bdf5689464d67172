//! Suite creation when no container runtime can be reached.
//!
//! Lives in its own test binary because it points `DOCKER_HOST` and the
//! config directory at paths that do not exist.

use testdock_core::{CoreError, SuiteOpts, SuiteRegistry};

fn point_at_missing_runtime() {
    let root = std::env::temp_dir().join(format!("testdock-missing-{}", std::process::id()));
    std::env::set_var("TESTDOCK_CONFIG_DIR", root.join("config"));
    std::env::set_var("DOCKER_HOST", "unix:///nonexistent/testdock/docker.sock");
}

#[tokio::test]
async fn test_unreachable_runtime_is_reported() {
    point_at_missing_runtime();
    let registry = SuiteRegistry::new();

    let err = registry
        .get_or_create("offline", SuiteOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RuntimeUnavailable { .. }));
    assert!(!err.is_skip());
    assert!(err.to_string().contains("/nonexistent/testdock/docker.sock"));

    let err = registry
        .get_or_create("offline", SuiteOpts::default().skip_on_init_error(true))
        .await
        .unwrap_err();
    assert!(err.is_skip());
    assert!(registry.is_empty());
}
