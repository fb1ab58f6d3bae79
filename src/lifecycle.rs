use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;

use crate::error::LogError;
use crate::service::Job;

const DEFAULT_SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// The application's startup and shutdown task registries.
///
/// Owned by the bootstrap sequencer and handed to whatever builds the
/// provider graph; connection bindings register their connect task here for
/// startup and their close task for shutdown. An explicit object rather than
/// process-global state, so independent applications in one process (tests,
/// mostly) can't see each other's tasks.
pub struct Lifecycle {
    startup: Mutex<Vec<Arc<dyn Job>>>,
    shutdown: Mutex<Vec<Arc<dyn Job>>>,
    shutdown_started: AtomicBool,
    shutdown_task_timeout: Duration,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(DEFAULT_SHUTDOWN_TASK_TIMEOUT)
    }

    /// `timeout` bounds each shutdown task individually, keeping the whole
    /// drain finite even when a close hangs.
    pub fn with_shutdown_timeout(timeout: Duration) -> Self {
        Self {
            startup: Mutex::new(vec![]),
            shutdown: Mutex::new(vec![]),
            shutdown_started: AtomicBool::new(false),
            shutdown_task_timeout: timeout,
        }
    }

    /// Runs once, after the provider graph is built and before the
    /// application is marked ready. A failure aborts startup.
    pub fn register_startup_task(&self, task: impl Job + 'static) {
        self.startup.lock().push(Arc::new(task));
    }

    /// Runs once, during graceful termination. Failures are logged, never
    /// fatal to the rest of the drain.
    pub fn register_shutdown_task(&self, task: impl Job + 'static) {
        self.shutdown.lock().push(Arc::new(task));
    }

    pub fn shutdown_has_started(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Runs every startup task in registration order. The first failure
    /// aborts the run and propagates; remaining tasks don't execute, since
    /// the application is never going to be marked ready anyway.
    pub async fn run_startup(&self) -> anyhow::Result<()> {
        let tasks = self.startup.lock().clone();
        for task in tasks {
            tracing::info!("Running startup task: {}", task.name());
            task.run_once()
                .await
                .with_context(|| format!("startup task failed: {}", task.name()))?;
        }
        Ok(())
    }

    /// Runs every shutdown task exactly once per process, each bounded by the
    /// per-task timeout and isolated from the others' failures. Later calls
    /// are no-ops.
    pub async fn run_shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown tasks already ran, skipping.");
            return;
        }
        let tasks = self.shutdown.lock().clone();
        tracing::info!("Running {} shutdown tasks.", tasks.len());
        for task in tasks {
            tracing::info!("Running shutdown task: {}", task.name());
            match tokio::time::timeout(self.shutdown_task_timeout, task.run_once()).await {
                Err(_) => tracing::error!(
                    "Shutdown task `{}` did not finish within {:?}",
                    task.name(),
                    self.shutdown_task_timeout
                ),
                Ok(result) => {
                    if result
                        .log_with_context(|| format!("Shutdown task `{}` failed", task.name()))
                        .is_some()
                    {
                        tracing::info!("Completed shutdown task: {}", task.name());
                    }
                }
            }
        }
        tracing::info!("Shutdown tasks complete.");
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
