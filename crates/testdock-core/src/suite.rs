//! Suites group the infrastructure of one test suite; the registry hands
//! them out by name.

use crate::{Container, ContainerOpts, CoreError, Engine, EngineSettings, Network, NetworkOpts};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use testdock_config::GlobalConfig;
use testdock_provider::{create_default_provider, ContainerProvider};

/// How a suite reaches the container runtime
#[derive(Default)]
pub struct SuiteOpts {
    /// Pre-built runtime client; discovered from config and `DOCKER_HOST` when unset
    pub client: Option<Arc<dyn ContainerProvider>>,
    /// Report an unreachable runtime as a skip instead of a failure
    pub skip_on_init_error: bool,
    /// Forward container output into the log
    pub verbose: bool,
    /// Engine settings; loaded from the global config when unset
    pub settings: Option<EngineSettings>,
}

impl SuiteOpts {
    pub fn with_client(mut self, client: Arc<dyn ContainerProvider>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn skip_on_init_error(mut self, skip: bool) -> Self {
        self.skip_on_init_error = skip;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl std::fmt::Debug for SuiteOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteOpts")
            .field("client", &self.client.as_ref().map(|c| c.info().endpoint))
            .field("skip_on_init_error", &self.skip_on_init_error)
            .field("verbose", &self.verbose)
            .field("settings", &self.settings)
            .finish()
    }
}

/// The infrastructure of one test suite: an engine and at most one network
pub struct Suite {
    name: String,
    engine: Engine,
    network: Mutex<Option<Network>>,
}

impl Suite {
    pub fn new(name: impl Into<String>, engine: Engine) -> Self {
        Self {
            name: name.into(),
            engine,
            network: Mutex::new(None),
        }
    }

    /// Build the suite's engine from `opts`
    pub async fn connect(name: impl Into<String>, opts: SuiteOpts) -> Result<Self> {
        let unavailable = |reason: String| CoreError::RuntimeUnavailable {
            reason,
            skip: opts.skip_on_init_error,
        };

        let (client, mut settings) = match (opts.client.clone(), opts.settings.clone()) {
            (Some(client), Some(settings)) => (client, settings),
            (client, settings) => {
                let config = GlobalConfig::load()?;
                let client = match client {
                    Some(client) => client,
                    None => Arc::new(
                        create_default_provider(&config)
                            .await
                            .map_err(|e| unavailable(e.to_string()))?,
                    ),
                };
                let settings =
                    settings.unwrap_or_else(|| EngineSettings::from(&config.lifecycle));
                (client, settings)
            }
        };
        if opts.verbose {
            settings.forward_logs = true;
        }

        Ok(Self::new(name, Engine::new(client, settings)))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Network>> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Declare the suite's network, replacing any earlier one
    pub fn network(&self, opts: NetworkOpts) -> Network {
        let network = self.engine.network(opts);
        if let Some(previous) = self.lock().replace(network.clone()) {
            tracing::debug!(
                "Suite {} replaces network {} with {}",
                self.name,
                previous.name(),
                network.name()
            );
        }
        network
    }

    /// Declare a container; attach it with [`Network::after`] or
    /// [`Container::after`]
    pub fn container(&self, opts: ContainerOpts) -> Container {
        self.engine.container(opts)
    }

    /// The current network, if one was declared
    pub fn current_network(&self) -> Option<Network> {
        self.lock().clone()
    }

    pub async fn start(&self) -> Result<()> {
        match self.current_network() {
            Some(network) => network.start().await,
            None => Ok(()),
        }
    }

    pub async fn reset(&self) -> Result<()> {
        match self.current_network() {
            Some(network) => network.reset().await,
            None => Ok(()),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self.current_network() {
            Some(network) => network.close().await,
            None => Ok(()),
        }
    }

    pub async fn remove(&self) -> Result<()> {
        match self.current_network() {
            Some(network) => network.remove().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("network", &*self.lock())
            .finish()
    }
}

/// Suites by name, kept until [`SuiteRegistry::unregister_all`].
///
/// Two callers racing to create the same name each connect; the first to
/// register wins and the other gets that suite back. Serialize acquisition
/// per name if that matters.
#[derive(Default)]
pub struct SuiteRegistry {
    suites: Mutex<HashMap<String, Arc<Suite>>>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Suite>>> {
        self.suites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The suite registered under `name`, created from `opts` if there is none.
    ///
    /// The flag tells whether the suite already existed.
    pub async fn get_or_create(&self, name: &str, opts: SuiteOpts) -> Result<(Arc<Suite>, bool)> {
        if let Some(suite) = self.get(name) {
            return Ok((suite, true));
        }

        let suite = Arc::new(Suite::connect(name, opts).await?);
        let mut suites = self.lock();
        if let Some(existing) = suites.get(name) {
            return Ok((existing.clone(), true));
        }
        suites.insert(name.to_string(), suite.clone());
        tracing::debug!("Registered suite {}", name);
        Ok((suite, false))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Suite>> {
        self.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered suite and forget them all.
    ///
    /// Failures are logged, the remaining suites are still closed.
    pub async fn unregister_all(&self) {
        let suites: Vec<Arc<Suite>> = self.lock().drain().map(|(_, suite)| suite).collect();
        for suite in suites {
            if let Err(e) = suite.close().await {
                tracing::warn!("Failed to close suite {}: {}", suite.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for SuiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.lock().keys().cloned().collect();
        f.debug_struct("SuiteRegistry").field("suites", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider};
    use testdock_provider::ContainerConfig;

    fn opts(provider: &Arc<MockProvider>) -> SuiteOpts {
        SuiteOpts::default()
            .with_client(provider.clone())
            .with_settings(EngineSettings::default())
    }

    #[tokio::test]
    async fn test_get_or_create_reports_found() {
        let registry = SuiteRegistry::new();
        let provider = Arc::new(MockProvider::new());

        let (first, found) = registry.get_or_create("api", opts(&provider)).await.unwrap();
        assert!(!found);
        let (second, found) = registry.get_or_create("api", opts(&provider)).await.unwrap();
        assert!(found);
        assert!(Arc::ptr_eq(&first, &second));

        let (_, found) = registry.get_or_create("worker", opts(&provider)).await.unwrap();
        assert!(!found);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_verbose_enables_log_forwarding() {
        let registry = SuiteRegistry::new();
        let provider = Arc::new(MockProvider::new());

        let (suite, _) = registry
            .get_or_create("loud", opts(&provider).verbose(true))
            .await
            .unwrap();
        assert!(suite.engine().settings().forward_logs);
    }

    #[tokio::test]
    async fn test_suite_lifecycle_follows_network() {
        let provider = Arc::new(MockProvider::new());
        let suite = Suite::connect("api", opts(&provider)).await.unwrap();

        let network = suite.network(NetworkOpts::new("api-net"));
        let db = suite.container(ContainerOpts::new("api-db", ContainerConfig::new("postgres:16")));
        network.after(&db).unwrap();

        suite.start().await.unwrap();
        assert!(db.id().is_some());
        suite.reset().await.unwrap();
        suite.close().await.unwrap();
        suite.remove().await.unwrap();

        assert!(network.is_removed());
        assert!(db.is_removed());
        assert!(provider.was_called(&MockCall::Restart {
            id: db.id().unwrap().0
        }));
    }

    #[tokio::test]
    async fn test_second_network_replaces_first() {
        let provider = Arc::new(MockProvider::new());
        let suite = Suite::connect("api", opts(&provider)).await.unwrap();

        suite.network(NetworkOpts::new("first"));
        suite.network(NetworkOpts::new("second"));
        suite.start().await.unwrap();

        assert_eq!(suite.current_network().unwrap().name(), "second");
        assert!(!provider.network_exists("first"));
        assert!(provider.network_exists("second"));
    }

    #[tokio::test]
    async fn test_suite_without_network_is_noop() {
        let provider = Arc::new(MockProvider::new());
        let suite = Suite::connect("empty", opts(&provider)).await.unwrap();

        suite.start().await.unwrap();
        suite.close().await.unwrap();
        suite.remove().await.unwrap();
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_all_closes_and_empties() {
        let registry = SuiteRegistry::new();
        let provider = Arc::new(MockProvider::new());

        for name in ["a", "b"] {
            let (suite, _) = registry.get_or_create(name, opts(&provider)).await.unwrap();
            let network = suite.network(NetworkOpts::new(format!("{}-net", name)));
            let c = suite.container(ContainerOpts::new(
                format!("{}-app", name),
                ContainerConfig::new("alpine:3.19"),
            ));
            network.after(&c).unwrap();
            suite.start().await.unwrap();
        }
        // a failing close is logged, the other suite still closes
        provider.fail_on("stop", "already dead");

        registry.unregister_all().await;

        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
        let stops = provider
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Stop { .. }))
            .count();
        assert_eq!(stops, 2);
    }
}
