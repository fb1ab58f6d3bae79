use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::lock::Mutex;

use crate::connection::{Client, ConnectionService};

/// Case-normalized identifier for one logical external resource.
///
/// `"sessions"` and `"SESSIONS"` name the same singleton. Bindings that don't
/// pick a name fall back to [`ResourceName::DEFAULT_NAME`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(String);

impl ResourceName {
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new(name: &str) -> Self {
        Self(name.to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ResourceName {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide state for one kind of external resource: at most one client
/// and at most one service per [`ResourceName`].
///
/// Client and service entries are independent namespaces keyed by the same
/// names. Both maps are append-only; teardown happens through the lifecycle
/// tasks each binding registers, not by removing entries.
///
/// The maps sit behind an async mutex that stays locked across the
/// construction await, so interleaved first-time requests for a name always
/// resolve to a single construction. First-time constructions of distinct
/// names serialize too, which only matters during startup.
pub struct ConnectionRegistry<C: Client> {
    clients: Mutex<HashMap<ResourceName, Arc<C>>>,
    services: Mutex<HashMap<ResourceName, Arc<ConnectionService<C>>>>,
}

impl<C: Client> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the client for `name`, running `construct` to create it if this
    /// is the first request. `construct` runs at most once per name for the
    /// process lifetime. If it fails, nothing is stored and the error
    /// propagates to whoever triggered the construction.
    pub async fn get_or_create_client<F, Fut>(
        &self,
        name: &ResourceName,
        construct: F,
    ) -> anyhow::Result<Arc<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<C>>,
    {
        get_or_create(&self.clients, name, || async {
            construct().await.map(Arc::new)
        })
        .await
    }

    /// Same contract as [`Self::get_or_create_client`], separate namespace.
    /// Typically invoked with a `construct` that wraps the already-created
    /// client for the same name.
    pub async fn get_or_create_service<F, Fut>(
        &self,
        name: &ResourceName,
        construct: F,
    ) -> anyhow::Result<Arc<ConnectionService<C>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Arc<ConnectionService<C>>>>,
    {
        get_or_create(&self.services, name, construct).await
    }

    /// The client for `name`, if one has been constructed.
    pub async fn client(&self, name: &ResourceName) -> Option<Arc<C>> {
        self.clients.lock().await.get(name).cloned()
    }

    /// The service for `name`, if one has been constructed.
    pub async fn service(&self, name: &ResourceName) -> Option<Arc<ConnectionService<C>>> {
        self.services.lock().await.get(name).cloned()
    }

    /// Names with a live client, in no particular order.
    pub async fn client_names(&self) -> Vec<ResourceName> {
        self.clients.lock().await.keys().cloned().collect()
    }
}

impl<C: Client> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

async fn get_or_create<V, F, Fut>(
    map: &Mutex<HashMap<ResourceName, V>>,
    name: &ResourceName,
    construct: F,
) -> anyhow::Result<V>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<V>>,
{
    // Lock held across the await: a second request for the same name cannot
    // reach the vacancy check until the first construction settles.
    let mut entries = map.lock().await;
    if let Some(existing) = entries.get(name) {
        return Ok(existing.clone());
    }
    let created = construct().await?;
    entries.insert(name.clone(), created.clone());
    Ok(created)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;
    use crate::connection::test_support::{FakeCacheClient, FakeConfig};

    fn registry() -> Arc<ConnectionRegistry<FakeCacheClient>> {
        Arc::new(ConnectionRegistry::new())
    }

    #[test]
    fn names_are_case_normalized() {
        assert_eq!(ResourceName::new("cache"), ResourceName::new("CACHE"));
        assert_eq!("ANALYTICS-CACHE", ResourceName::new("analytics-cache").as_str());
        assert_eq!("DEFAULT", ResourceName::default().as_str());
    }

    #[tokio::test]
    async fn constructs_at_most_once_per_name() {
        let registry = registry();
        let constructions = AtomicUsize::new(0);
        let name = ResourceName::new("default");

        for _ in 0..3 {
            registry
                .get_or_create_client(&name, || async {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    Ok(FakeCacheClient::new(FakeConfig::new("fake://x")))
                })
                .await
                .unwrap();
        }

        assert_eq!(1, constructions.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn same_name_different_case_shares_one_client() {
        let registry = registry();
        let lower = registry
            .get_or_create_client(&"cache".into(), || async {
                Ok(FakeCacheClient::new(FakeConfig::new("fake://x")))
            })
            .await
            .unwrap();
        let upper = registry
            .get_or_create_client(&"CACHE".into(), || async {
                panic!("second construction for the same name")
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&lower, &upper));
    }

    #[tokio::test]
    async fn concurrent_first_requests_construct_once() {
        let registry = registry();
        let constructions = Arc::new(AtomicUsize::new(0));
        let name = ResourceName::new("default");

        let requests = (0..8).map(|_| {
            let registry = registry.clone();
            let constructions = constructions.clone();
            let name = name.clone();
            async move {
                registry
                    .get_or_create_client(&name, || async move {
                        constructions.fetch_add(1, Ordering::SeqCst);
                        // Suspend mid-construction so other requests can
                        // interleave while this one is in flight.
                        tokio::task::yield_now().await;
                        Ok(FakeCacheClient::new(FakeConfig::new("fake://x")))
                    })
                    .await
                    .unwrap()
            }
        });
        let clients = join_all(requests).await;

        assert_eq!(1, constructions.load(Ordering::SeqCst));
        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn failed_construction_stores_nothing() {
        let registry = registry();
        let name = ResourceName::new("default");

        let failed = registry
            .get_or_create_client(&name, || async { anyhow::bail!("resolver exploded") })
            .await;
        assert!(failed.is_err());
        assert!(registry.client(&name).await.is_none());

        // A later request may retry and succeed.
        registry
            .get_or_create_client(&name, || async {
                Ok(FakeCacheClient::new(FakeConfig::new("fake://x")))
            })
            .await
            .unwrap();
        assert!(registry.client(&name).await.is_some());
    }

    #[tokio::test]
    async fn client_and_service_namespaces_are_independent() {
        let registry = registry();
        let name = ResourceName::new("default");
        let client = registry
            .get_or_create_client(&name, || async {
                Ok(FakeCacheClient::new(FakeConfig::new("fake://x")))
            })
            .await
            .unwrap();

        assert!(registry.service(&name).await.is_none());

        let service = registry
            .get_or_create_service(&name, || async {
                Ok(Arc::new(ConnectionService::new(name.clone(), client.clone())))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(
            &service,
            &registry.service(&name).await.unwrap()
        ));
        assert_eq!(vec![name], registry.client_names().await);
    }
}
