//! Log setup for test binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target of forwarded container output
pub const CONTAINER_LOG_TARGET: &str = "testdock::container_logs";

fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!(
        "testdock_core={level},testdock_provider={level},{target}=info",
        level = level,
        target = CONTAINER_LOG_TARGET
    )
}

/// Install a subscriber writing through the test harness.
///
/// `RUST_LOG` wins over the defaults. Safe to call from every test; only
/// the first call installs anything.
pub fn init_test_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert!(default_directives(true).starts_with("testdock_core=debug"));
        assert!(default_directives(false).contains("testdock_provider=info"));
        assert!(default_directives(false).ends_with("testdock::container_logs=info"));
    }

    #[test]
    fn test_init_twice() {
        init_test_logging(false);
        init_test_logging(true);
    }
}
