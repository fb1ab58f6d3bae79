use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::ensure;

use crate::error::display_error;
use crate::health_endpoint::{self, HealthEndpointConfig};
use crate::lifecycle::Lifecycle;
use crate::service::Job;
use crate::service_manager::{Initialize, Serves, ServiceManager};
use crate::time::{SystemClock, TokioSleeper};

/// Anything the sequencer can bring up: a provider graph with init jobs and
/// long-running services. Usually implemented with the [`application!`]
/// macro.
///
/// [`application!`]: crate::application!
pub trait Application: Initialize + Serves + Send + Sync {}
impl<T: Initialize + Serves + Send + Sync> Application for T {}

pub struct RunConfig {
    /// Interval in seconds between application status log messages when there are no problems.
    pub log_interval: i32,
    /// Services will be restarted after they have been in a failing state for this many seconds.
    pub attempt_recovery_after: i32,
    /// Set to None to disable the http health endpoint.
    pub http_health_endpoint: Option<HealthEndpointConfig>,
    /// How long to wait for each service to stop during graceful shutdown.
    pub service_stop_timeout: Duration,
}

impl RunConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.log_interval >= 0);
        ensure!(self.attempt_recovery_after >= 0);
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_interval: 21600,
            attempt_recovery_after: 120,
            http_health_endpoint: Some(Default::default()),
            service_stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives the application from process start to process exit.
///
/// Owns the [`Lifecycle`] that resource bindings register their connect and
/// close tasks with. Each sequencer is independent state; tests can run any
/// number of applications in one process without sharing registries.
pub struct Bootstrap {
    lifecycle: Arc<Lifecycle>,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self::with_lifecycle(Arc::new(Lifecycle::new()))
    }

    pub fn with_lifecycle(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    /// Builds the application and brings it to the ready state:
    ///
    /// 1. install the process fault handler;
    /// 2. await `build`, which is where resource bindings happen, registering
    ///    their lifecycle tasks;
    /// 3. run the startup tasks (every bound resource connects; any failure
    ///    rejects startup before a single request is served);
    /// 4. run the application's own init jobs;
    /// 5. spawn the long-running services.
    pub async fn start<A, F, Fut>(self, build: F) -> anyhow::Result<RunningApp>
    where
        A: Application,
        F: FnOnce(Arc<Lifecycle>) -> Fut,
        Fut: Future<Output = anyhow::Result<A>>,
    {
        install_fault_handler();
        tracing::info!("Building application.");
        let app = build(self.lifecycle.clone()).await?;
        tracing::info!("Initializing application.");
        self.lifecycle.run_startup().await?;
        app.init().run_once().await?;
        let mut mgr = ServiceManager::new(
            Arc::new(SystemClock::default()),
            Arc::new(TokioSleeper::default()),
        );
        for service in app.services() {
            mgr.register_service(service);
        }
        tracing::info!("Starting services.");
        mgr.spawn_services().await?;
        tracing::info!("Application ready.");
        Ok(RunningApp {
            manager: Arc::new(mgr),
            lifecycle: self.lifecycle,
        })
    }

    /// Starts the app, serves until the process receives SIGTERM or SIGINT,
    /// then drains: services stop first, then every registered shutdown task
    /// runs (each bound resource closes), then this returns so the process
    /// can exit.
    pub async fn run<A, F, Fut>(self, build: F, config: RunConfig) -> anyhow::Result<()>
    where
        A: Application,
        F: FnOnce(Arc<Lifecycle>) -> Fut,
        Fut: Future<Output = anyhow::Result<A>>,
    {
        config.validate()?;
        let running = self.start(build).await?;
        if let Some(health_config) = config.http_health_endpoint {
            let mgr = running.manager().clone();
            tokio::spawn(async move { health_endpoint::run(mgr, health_config).await });
        }
        tokio::select! {
            _ = running.manager().monitor_with_recovery(
                10,
                config.log_interval,
                config.attempt_recovery_after,
            ) => {}
            received = termination_signal() => match received {
                Ok(signal) => tracing::info!("Received {signal}, shutting down gracefully..."),
                Err(e) => tracing::error!(
                    "Cannot listen for termination signals, shutting down: {}",
                    display_error(&e)
                ),
            },
        }
        running.shutdown(config.service_stop_timeout).await;
        Ok(())
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

/// An application past the ready point: services running, resources
/// connected.
pub struct RunningApp {
    manager: Arc<ServiceManager>,
    lifecycle: Arc<Lifecycle>,
}

impl RunningApp {
    pub fn manager(&self) -> &Arc<ServiceManager> {
        &self.manager
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Graceful termination: stop the services, then run the shutdown tasks.
    /// Connections close only after nothing is serving requests over them.
    pub async fn shutdown(self, service_stop_timeout: Duration) {
        tracing::info!("Shutting down gracefully...");
        self.manager.abort_all(service_stop_timeout).await;
        self.lifecycle.run_shutdown().await;
    }
}

/// Logs panics that escape all other handling. Logs only: shutdown tasks are
/// bound to orderly termination, so a fault does not drain resources.
fn install_fault_handler() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!("Uncaught panic: {info}");
            previous(info);
        }));
    });
}

async fn termination_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT").map_err(Into::into),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("interrupt")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::connection::test_support::{FakeCacheClient, FakeConfig};
    use crate::connection::{ConnectionBinder, ConnectionService};
    use crate::registry::ResourceName;
    use crate::service::{Job, LoopConfig, LoopingJobService, SelfConfiguredLoop};

    struct TestApp {
        cache: Arc<ConnectionService<FakeCacheClient>>,
    }

    crate::application! {
        self: TestApp
        provided {
            Arc<ConnectionService<FakeCacheClient>>: self.cache.clone(),
        }
    }

    #[tokio::test]
    async fn connects_before_ready_and_closes_after_shutdown() {
        let bootstrap = Bootstrap::new();
        let binder = Arc::new(ConnectionBinder::<FakeCacheClient>::new(
            bootstrap.lifecycle(),
        ));

        let build_binder = binder.clone();
        let running = bootstrap
            .start(move |_lifecycle| async move {
                let cache = build_binder
                    .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
                    .await?;
                Ok(TestApp { cache })
            })
            .await
            .unwrap();

        let service = binder
            .registry()
            .service(&ResourceName::default())
            .await
            .unwrap();
        assert_eq!(1, service.client().connect_count());
        assert_eq!(0, service.client().close_count());

        running.shutdown(Duration::from_secs(1)).await;
        assert_eq!(1, service.client().close_count());
    }

    #[tokio::test]
    async fn connect_failure_rejects_startup() {
        let bootstrap = Bootstrap::new();
        let binder = Arc::new(ConnectionBinder::<FakeCacheClient>::new(
            bootstrap.lifecycle(),
        ));

        let started = bootstrap
            .start(move |_lifecycle| async move {
                let cache = binder
                    .bind_default(|| async { Ok(FakeConfig::failing_connect("fake://x")) })
                    .await?;
                Ok(TestApp { cache })
            })
            .await;
        assert!(started.is_err());
    }

    #[tokio::test]
    async fn resolver_failure_rejects_startup() {
        let bootstrap = Bootstrap::new();
        let binder = Arc::new(ConnectionBinder::<FakeCacheClient>::new(
            bootstrap.lifecycle(),
        ));

        let started = bootstrap
            .start(move |_lifecycle| async move {
                let cache = binder
                    .bind_default(|| async { anyhow::bail!("missing CACHE_URI") })
                    .await?;
                Ok(TestApp { cache })
            })
            .await;
        assert!(started.is_err());
    }

    crate::inject!(
        pub struct WarmCache {
            cache: Arc<ConnectionService<FakeCacheClient>>,
        }
    );

    #[async_trait]
    impl Job for WarmCache {
        async fn run_once(&self) -> anyhow::Result<()> {
            anyhow::ensure!(
                self.cache.client().connect_count() == 1,
                "init job ran before the cache connected"
            );
            Ok(())
        }
    }

    crate::inject!(
        pub struct ScrapePulse {
            cache: Arc<ConnectionService<FakeCacheClient>>,
        }
    );

    static PULSES: AtomicUsize = AtomicUsize::new(0);

    #[async_trait]
    impl Job for ScrapePulse {
        async fn run_once(&self) -> anyhow::Result<()> {
            anyhow::ensure!(self.cache.client().connect_count() == 1);
            PULSES.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl SelfConfiguredLoop for ScrapePulse {
        fn loop_config(&self) -> LoopConfig {
            LoopConfig {
                delay_secs: 1,
                max_iteration_secs: 1,
            }
        }
    }

    struct ScraperApp {
        cache: Arc<ConnectionService<FakeCacheClient>>,
    }

    crate::application! {
        self: ScraperApp
        init [WarmCache]
        services [ScrapePulse as LoopingJobService]
        provided {
            Arc<ConnectionService<FakeCacheClient>>: self.cache.clone(),
        }
    }

    #[tokio::test]
    async fn full_application_wires_init_jobs_and_services() {
        let bootstrap = Bootstrap::new();
        let binder = Arc::new(ConnectionBinder::<FakeCacheClient>::new(
            bootstrap.lifecycle(),
        ));

        let build_binder = binder.clone();
        let running = bootstrap
            .start(move |_lifecycle| async move {
                let cache = build_binder
                    .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
                    .await?;
                Ok(ScraperApp { cache })
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let report = running.manager().check();
        assert_eq!(1, report.alive.len());
        assert!(PULSES.load(Ordering::SeqCst) >= 1);

        running.shutdown(Duration::from_secs(1)).await;
        let service = binder
            .registry()
            .service(&ResourceName::default())
            .await
            .unwrap();
        assert_eq!(1, service.client().close_count());
    }
}
