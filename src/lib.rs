//! Resource Frame is an application bootstrap layer with compile-time
//! dependency injection and a named external-connection registry.
//!
//! Backend services (http APIs, scraping workers) all need the same wiring:
//! read configuration, open connections to shared external resources (a
//! document store, a cache server), hold exactly one client per resource no
//! matter how many consumers ask for it, and close everything cleanly when
//! the process is told to stop. The frame owns that wiring. A binding
//! declares "I need a connection to resource X, configured by resolver F";
//! the registry turns it into a process-wide singleton client/service pair;
//! the bootstrap sequencer connects every bound resource before the
//! application is marked ready, and closes them all (best effort, bounded,
//! logged) when SIGTERM or SIGINT arrives.
//!
//! This trivial example illustrates the bare minimum boilerplate to use the
//! frame, but doesn't actually run anything useful.
//!
//! ```rust
//! use resource_frame::{
//!     application,
//!     bootstrap::{Bootstrap, RunConfig},
//! };
//!
//! async fn tokio_main() -> anyhow::Result<()> {
//!     Bootstrap::new()
//!         .run(|_lifecycle| async move { Ok(MyApp) }, RunConfig::default())
//!         .await
//! }
//!
//! pub struct MyApp;
//!
//! application!(self: MyApp);
//! ```
//!
//! This example binds a cache-server connection and injects it into an init
//! job and a looping worker, to illustrate the pieces and how they fit:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//!
//! use resource_frame::{
//!     application,
//!     bootstrap::Bootstrap,
//!     connection::{Client, ConnectionBinder, ConnectionService},
//!     inject,
//!     resources::CacheConfig,
//!     service::{Job, LoopConfig, LoopingJobService, SelfConfiguredLoop},
//! };
//!
//! async fn tokio_main() -> anyhow::Result<()> {
//!     Bootstrap::new()
//!         .run(
//!             |lifecycle| async move {
//!                 let cache = ConnectionBinder::<CacheClient>::new(lifecycle);
//!                 let sessions = cache
//!                     .bind("sessions", || async {
//!                         Ok(CacheConfig::new("redis://127.0.0.1:6379"))
//!                     })
//!                     .await?;
//!                 Ok(ScraperApp { sessions })
//!             },
//!             Default::default(),
//!         )
//!         .await
//! }
//!
//! // The frame never speaks a wire protocol. An integration wraps its driver
//! // in a `Client`; the frame manages identity and lifecycle.
//! pub struct CacheClient {
//!     config: CacheConfig,
//! }
//!
//! #[async_trait]
//! impl Client for CacheClient {
//!     type Config = CacheConfig;
//!
//!     fn kind() -> &'static str {
//!         "cache-server"
//!     }
//!
//!     async fn build(config: CacheConfig) -> anyhow::Result<Self> {
//!         Ok(Self { config })
//!     }
//!
//!     async fn connect(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn close(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! pub struct ScraperApp {
//!     sessions: Arc<ConnectionService<CacheClient>>,
//! }
//!
//! application! {
//!     self: ScraperApp
//!
//!     // Init jobs run once during startup, after every bound resource has
//!     // connected.
//!     init [
//!         WarmSessionCache
//!     ]
//!
//!     // Services run for the entire lifetime of the application.
//!     services [
//!         ScrapeLoop as LoopingJobService,
//!     ]
//!
//!     // Singleton connection services enter the provider graph here: bound
//!     // once during the build step, then provided to any number of
//!     // consumers as clones of the same Arc.
//!     provided {
//!         Arc<ConnectionService<CacheClient>>: self.sessions.clone(),
//!     }
//! }
//!
//! inject!(
//!     pub struct WarmSessionCache {
//!         sessions: Arc<ConnectionService<CacheClient>>,
//!     }
//! );
//!
//! #[async_trait]
//! impl Job for WarmSessionCache {
//!     async fn run_once(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! inject!(
//!     pub struct ScrapeLoop {
//!         sessions: Arc<ConnectionService<CacheClient>>,
//!     }
//! );
//!
//! #[async_trait]
//! impl Job for ScrapeLoop {
//!     async fn run_once(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! impl SelfConfiguredLoop for ScrapeLoop {
//!     fn loop_config(&self) -> LoopConfig {
//!         LoopConfig {
//!             delay_secs: 10,
//!             max_iteration_secs: 20,
//!         }
//!     }
//! }
//! ```

/// Drives the application from process start to process exit.
pub mod bootstrap;
/// The client-handle seam, the connection-service façade, and the binder.
pub mod connection;
/// Define a type as a dependent or a dependency provider.
pub mod dependency_injection;
/// Simple and versatile error handling and logging.
pub mod error;
/// Externally facing http endpoint to report service health.
pub mod health_endpoint;
/// Startup and shutdown task registries, driven by the bootstrap sequencer.
pub mod lifecycle;
/// Named singleton clients and services, at most one of each per resource.
pub mod registry;
/// Typed connection settings for the shared resource kinds.
pub mod resources;
/// Defines which behaviors are required to define a job or service.
pub mod service;
/// Runs services and monitors their health.
pub mod service_manager;
/// Clock dependencies that are easily swapped out and mocked, to reduce direct dependencies on syscalls.
pub mod time;

/// misc items that are too small to get their own files,
/// kept out of this file to reduce clutter.
mod util;
pub use util::*;
