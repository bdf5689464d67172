//! Readiness probes run after a container starts or resets

use crate::{Container, CoreError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Reason a probe did not succeed yet
pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type Probe =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<(), ProbeError>> + Send + Sync>;

pub(crate) fn sync_probe<F, E>(probe: F) -> Probe
where
    F: Fn() -> std::result::Result<(), E> + Send + Sync + 'static,
    E: Into<ProbeError>,
{
    Box::new(move || {
        let outcome = probe().map_err(Into::into);
        Box::pin(async move { outcome })
    })
}

pub(crate) fn async_probe<F, Fut, E>(probe: F) -> Probe
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Into<ProbeError>,
{
    Box::new(move || {
        let pending = probe();
        Box::pin(async move { pending.await.map_err(Into::into) })
    })
}

/// Decides whether a started container is ready to serve
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, container: &Container) -> std::result::Result<(), ProbeError>;
}

/// Ready as soon as the runtime reports the container running
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningCheck;

#[async_trait]
impl HealthCheck for RunningCheck {
    async fn check(&self, container: &Container) -> std::result::Result<(), ProbeError> {
        let details = container.inspect().await?;
        if details.running {
            Ok(())
        } else {
            Err(format!("container is {}", details.status).into())
        }
    }
}

/// Ready once a GET on `url` answers 200
#[derive(Debug, Clone)]
pub struct HttpCheck {
    url: String,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthCheck for HttpCheck {
    async fn check(&self, _container: &Container) -> std::result::Result<(), ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(format!("wrong status code {} from {}", status, self.url).into())
        }
    }
}

/// Caller-supplied probe, e.g. a database ping
pub struct CustomCheck {
    probe: Probe,
}

impl CustomCheck {
    pub fn new<F, E>(probe: F) -> Self
    where
        F: Fn() -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<ProbeError>,
    {
        Self {
            probe: sync_probe(probe),
        }
    }

    pub fn from_async<F, Fut, E>(probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<ProbeError>,
    {
        Self {
            probe: async_probe(probe),
        }
    }
}

impl std::fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCheck").finish_non_exhaustive()
    }
}

#[async_trait]
impl HealthCheck for CustomCheck {
    async fn check(&self, _container: &Container) -> std::result::Result<(), ProbeError> {
        (self.probe)().await
    }
}

/// Poll `check` until it succeeds or `timeout` passes.
///
/// The first attempt runs immediately, later ones once per `poll_interval`.
/// A probe still running at the deadline is dropped.
pub(crate) async fn wait_healthy(
    container: &Container,
    check: &dyn HealthCheck,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let started = Instant::now();
    let mut last_error: Option<String> = None;

    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let polling = async {
        let mut attempt: u32 = 0;
        loop {
            ticker.tick().await;
            attempt += 1;
            match check.check(container).await {
                Ok(()) => return attempt,
                Err(e) => {
                    tracing::debug!(
                        name = container.name(),
                        attempt,
                        "health check failed: {}",
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }
    };
    let outcome = tokio::time::timeout(timeout, polling).await;

    match outcome {
        Ok(attempts) => {
            tracing::debug!(
                name = container.name(),
                attempts,
                elapsed = ?started.elapsed(),
                "health check passed"
            );
            Ok(())
        }
        Err(_) => Err(CoreError::HealthCheckTimeout {
            resource: container.name().to_string(),
            id: container
                .id()
                .map(|id| id.0)
                .unwrap_or_else(|| "no id".to_string()),
            timeout,
            last_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockProvider;
    use crate::{ContainerOpts, Engine, EngineSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use testdock_provider::ContainerConfig;

    fn container() -> (Container, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new());
        let engine = Engine::new(provider.clone(), EngineSettings::default());
        let container =
            engine.container(ContainerOpts::new("probe", ContainerConfig::new("alpine:3.19")));
        (container, provider)
    }

    fn failing_times(failures: usize) -> (CustomCheck, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let check = CustomCheck::new(move || -> std::result::Result<(), String> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(format!("attempt {} refused", n + 1))
            } else {
                Ok(())
            }
        });
        (check, attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_runs_immediately() {
        let (container, _) = container();
        let (check, attempts) = failing_times(0);

        let started = Instant::now();
        wait_healthy(
            &container,
            &check,
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_after_two_intervals() {
        let (container, _) = container();
        let (check, attempts) = failing_times(2);

        let started = Instant::now();
        wait_healthy(
            &container,
            &check,
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let elapsed = started.elapsed();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_healthy_times_out_after_one_interval() {
        let (container, _) = container();
        let check = CustomCheck::new(|| -> std::result::Result<(), String> {
            Err("connection refused".to_string())
        });

        let started = Instant::now();
        let err = wait_healthy(
            &container,
            &check,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(1));
        match err {
            CoreError::HealthCheckTimeout {
                resource,
                timeout,
                last_error,
                ..
            } => {
                assert_eq!(resource, "probe");
                assert_eq!(timeout, Duration::from_secs(1));
                assert_eq!(last_error.as_deref(), Some("connection refused"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_cancelled_at_deadline() {
        let (container, _) = container();
        let check = CustomCheck::from_async(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), String>(())
        });

        let started = Instant::now();
        let err = wait_healthy(
            &container,
            &check,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CoreError::HealthCheckTimeout {
                last_error: None,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_running_check_follows_inspect() {
        let provider = Arc::new(MockProvider::new());
        provider.keep_stopped("probe");
        let engine = Engine::new(provider.clone(), EngineSettings::default());
        let network = engine.network(crate::NetworkOpts::new("health-net"));
        let container = engine.container(
            ContainerOpts::new("probe", ContainerConfig::new("alpine:3.19"))
                .health_check(CustomCheck::new(|| Ok::<(), String>(()))),
        );
        network.after(&container).unwrap();
        network.start().await.unwrap();

        let err = RunningCheck.check(&container).await.unwrap_err();
        assert!(err.to_string().contains("created"), "{}", err);

        provider.set_running("probe", true);
        RunningCheck.check(&container).await.unwrap();
    }

    /// Answer a single request on a local port with `status`
    async fn serve_once(status: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_http_check_accepts_only_200() {
        let (container, _) = container();

        let ok = HttpCheck::new(serve_once("200 OK").await);
        ok.check(&container).await.unwrap();

        for status in ["204 No Content", "500 Internal Server Error"] {
            let check = HttpCheck::new(serve_once(status).await);
            let err = check.check(&container).await.unwrap_err();
            let code = &status[..3];
            assert!(err.to_string().contains(code), "{}: {}", status, err);
        }
    }

    #[tokio::test]
    async fn test_http_check_refused_connection_fails() {
        let (container, _) = container();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let check = HttpCheck::new(format!("http://{}/health", addr));
        assert!(check.check(&container).await.is_err());
    }

    #[tokio::test]
    async fn test_running_check_before_start_fails() {
        let (container, _) = container();
        assert!(RunningCheck.check(&container).await.is_err());
    }
}
