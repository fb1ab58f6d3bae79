use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{display_error, ResourceError};
use crate::lifecycle::Lifecycle;
use crate::registry::{ConnectionRegistry, ResourceName};
use crate::service::Job;

/// The opaque handle to one external resource.
///
/// Implemented by whichever integration is being bound (a document-store
/// driver, a cache-server driver). The frame never looks inside: it builds
/// the handle from resolved configuration, connects it once during startup,
/// and closes it once during shutdown.
#[async_trait]
pub trait Client: Send + Sync + Sized + 'static {
    /// The resolved configuration this handle is built from.
    type Config: Send + 'static;

    /// What this handle connects to, for log context ("cache-server",
    /// "document-store").
    fn kind() -> &'static str;

    async fn build(config: Self::Config) -> anyhow::Result<Self>;

    async fn connect(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Consumer-facing façade over exactly one client handle.
///
/// Created once per resource name and shares the handle's lifetime. Closing
/// the handle through any path invalidates the wrapper's operations; the
/// frame only closes during shutdown, after which the process exits.
pub struct ConnectionService<C: Client> {
    name: ResourceName,
    client: Arc<C>,
}

impl<C: Client> ConnectionService<C> {
    pub(crate) fn new(name: ResourceName, client: Arc<C>) -> Self {
        Self { name, client }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// The underlying handle. Resource-specific operations live here.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Opens the underlying connection. A failure is logged with the resource
    /// name and propagated: the application must never begin serving requests
    /// with a resource it could not connect to.
    pub async fn connect(&self) -> anyhow::Result<()> {
        match self.client.connect().await {
            Ok(()) => {
                tracing::info!("Connected to {} `{}`", C::kind(), self.name);
                Ok(())
            }
            Err(e) => {
                let e: anyhow::Error =
                    ResourceError::connection(C::kind(), self.name.clone(), e).into();
                tracing::error!("{}", display_error(&e));
                Err(e)
            }
        }
    }

    /// Closes the underlying connection, logging start and completion.
    pub async fn close(&self) -> anyhow::Result<()> {
        tracing::info!("Closing {} `{}` connection...", C::kind(), self.name);
        self.client
            .close()
            .await
            .map_err(|e| ResourceError::disconnection(C::kind(), self.name.clone(), e))?;
        tracing::info!("{} `{}` connection closed", C::kind(), self.name);
        Ok(())
    }
}

pub struct BindingConfig {
    /// A connect attempt that outlives this bound fails startup instead of
    /// stalling it forever. `None` removes the bound.
    pub connect_timeout: Option<Duration>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Turns "I need a connection to resource X, configured by resolver F" into a
/// process-wide singleton client/service pair bound to the application
/// lifecycle.
///
/// One binder per resource kind. Every consumer that binds the same name gets
/// the same [`ConnectionService`]; the resolver runs, the client is built, and
/// the connect/close lifecycle tasks are registered only for the first of
/// them.
pub struct ConnectionBinder<C: Client> {
    registry: Arc<ConnectionRegistry<C>>,
    lifecycle: Arc<Lifecycle>,
    config: BindingConfig,
}

impl<C: Client> ConnectionBinder<C> {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self::with_config(lifecycle, BindingConfig::default())
    }

    pub fn with_config(lifecycle: Arc<Lifecycle>, config: BindingConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            lifecycle,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Binds the fallback resource name, for the common one-of-a-kind case.
    pub async fn bind_default<R, Fut>(
        &self,
        resolver: R,
    ) -> anyhow::Result<Arc<ConnectionService<C>>>
    where
        R: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<C::Config>> + Send,
    {
        self.bind(ResourceName::DEFAULT_NAME, resolver).await
    }

    /// Produces the singleton service for `name`, creating the client on the
    /// first request by awaiting `resolver` and building the handle from its
    /// result. On first creation the connect task (startup) and close task
    /// (shutdown) are registered with the lifecycle; later binds of the same
    /// name return the cached service without touching the resolver or the
    /// lifecycle again.
    pub async fn bind<R, Fut>(
        &self,
        name: &str,
        resolver: R,
    ) -> anyhow::Result<Arc<ConnectionService<C>>>
    where
        R: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<C::Config>> + Send,
    {
        let name = ResourceName::new(name);

        let client = self
            .registry
            .get_or_create_client(&name, || {
                let name = name.clone();
                async move {
                    let config = resolver().await.map_err(|e| {
                        ResourceError::configuration_resolution(C::kind(), name.clone(), e)
                    })?;
                    tracing::debug!("Building {} client `{}`", C::kind(), name);
                    C::build(config).await
                }
            })
            .await?;

        self.registry
            .get_or_create_service(&name, || {
                let name = name.clone();
                let client = client.clone();
                let lifecycle = self.lifecycle.clone();
                let connect_timeout = self.config.connect_timeout;
                async move {
                    let service = Arc::new(ConnectionService::new(name, client));
                    lifecycle.register_startup_task(ConnectOnStartup {
                        service: service.clone(),
                        timeout: connect_timeout,
                    });
                    lifecycle.register_shutdown_task(CloseOnShutdown {
                        service: service.clone(),
                    });
                    Ok(service)
                }
            })
            .await
    }
}

struct ConnectOnStartup<C: Client> {
    service: Arc<ConnectionService<C>>,
    timeout: Option<Duration>,
}

#[async_trait]
impl<C: Client> Job for ConnectOnStartup<C> {
    async fn run_once(&self) -> anyhow::Result<()> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.service.connect()).await {
                Ok(result) => result,
                Err(_) => {
                    let e: anyhow::Error = ResourceError::connection(
                        C::kind(),
                        self.service.name().clone(),
                        anyhow::anyhow!("connect did not complete within {limit:?}"),
                    )
                    .into();
                    tracing::error!("{}", display_error(&e));
                    Err(e)
                }
            },
            None => self.service.connect().await,
        }
    }

    fn name(&self) -> String {
        format!("connect {} `{}`", C::kind(), self.service.name())
    }
}

struct CloseOnShutdown<C: Client> {
    service: Arc<ConnectionService<C>>,
}

#[async_trait]
impl<C: Client> Job for CloseOnShutdown<C> {
    async fn run_once(&self) -> anyhow::Result<()> {
        self.service.close().await
    }

    fn name(&self) -> String {
        format!("close {} `{}`", C::kind(), self.service.name())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::test_support::{FakeCacheClient, FakeConfig};
    use super::*;

    fn binder() -> ConnectionBinder<FakeCacheClient> {
        ConnectionBinder::new(Arc::new(Lifecycle::new()))
    }

    #[tokio::test]
    async fn bind_returns_one_service_per_name() {
        let binder = binder();
        let resolutions = AtomicUsize::new(0);

        let first = binder
            .bind("sessions", || async {
                resolutions.fetch_add(1, Ordering::SeqCst);
                Ok(FakeConfig::new("fake://sessions"))
            })
            .await
            .unwrap();
        let second = binder
            .bind("SESSIONS", || async {
                resolutions.fetch_add(1, Ordering::SeqCst);
                Ok(FakeConfig::new("fake://sessions"))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, resolutions.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bind_default_falls_back_to_the_default_name() {
        let binder = binder();
        let service = binder
            .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
            .await
            .unwrap();
        assert_eq!("DEFAULT", service.name().as_str());
    }

    #[tokio::test]
    async fn resolver_failure_surfaces_and_stores_nothing() {
        let binder = binder();
        let failed = binder
            .bind("default", || async { anyhow::bail!("no uri configured") })
            .await
            .err()
            .expect("bind should fail when the resolver fails");
        assert!(format!("{failed:#}")
            .contains("failed to resolve configuration for cache-server `DEFAULT`"));
        assert!(binder
            .registry()
            .client(&"default".into())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn startup_connects_each_bound_resource_exactly_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        let binder = ConnectionBinder::<FakeCacheClient>::new(lifecycle.clone());

        let service = binder
            .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
            .await
            .unwrap();
        // A second consumer binding the same name must not add more hooks.
        binder
            .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
            .await
            .unwrap();

        assert_eq!(0, service.client().connect_count());
        lifecycle.run_startup().await.unwrap();
        assert_eq!(1, service.client().connect_count());
    }

    #[tokio::test]
    async fn connect_failure_aborts_startup() {
        let lifecycle = Arc::new(Lifecycle::new());
        let binder = ConnectionBinder::<FakeCacheClient>::new(lifecycle.clone());
        binder
            .bind_default(|| async { Ok(FakeConfig::failing_connect("fake://x")) })
            .await
            .unwrap();

        let started = lifecycle.run_startup().await;
        assert!(started.is_err());
    }

    #[tokio::test]
    async fn hung_connect_fails_startup_at_the_timeout() {
        let lifecycle = Arc::new(Lifecycle::new());
        let binder = ConnectionBinder::<FakeCacheClient>::with_config(
            lifecycle.clone(),
            BindingConfig {
                connect_timeout: Some(Duration::from_millis(20)),
            },
        );
        binder
            .bind_default(|| async { Ok(FakeConfig::hanging_connect("fake://x")) })
            .await
            .unwrap();

        let started = lifecycle.run_startup().await;
        let message = format!("{:#}", started.unwrap_err());
        assert!(message.contains("failed to connect cache-server `DEFAULT`"));
    }

    #[tokio::test]
    async fn shutdown_closes_each_bound_resource_exactly_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        let binder = ConnectionBinder::<FakeCacheClient>::new(lifecycle.clone());
        let service = binder
            .bind_default(|| async { Ok(FakeConfig::new("fake://x")) })
            .await
            .unwrap();

        lifecycle.run_startup().await.unwrap();
        lifecycle.run_shutdown().await;
        assert_eq!(1, service.client().close_count());

        // Shutdown runs once per process; a second trigger is a no-op.
        lifecycle.run_shutdown().await;
        assert_eq!(1, service.client().close_count());
    }
}
