//! Relay runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use skyrelay_common::{LoggingConfig, init_tracing};

use crate::RelayArgs;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// How long tasks get to observe the shutdown signal before being aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Runner that manages the lifecycle of a relay binary.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Shutdown broadcast to tasks on Ctrl+C / SIGTERM
/// - Bounded wait for tasks to finish, then abort
///
/// # Example
///
/// ```ignore
/// use skyrelay_framework::{RelayArgs, RelayConfig, RelayRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = RelayArgs::parse_with_default("relay.json5");
///     let config = MyConfig::load(&args.config)?;
///
///     let mut runner = RelayRunner::new_with_args("relay", config, Some(&args))?;
///     let shutdown = runner.shutdown_signal();
///     runner.spawn("worker", async move {
///         // Worker logic here, exits when `shutdown` flips to true
///     });
///
///     runner.run().await
/// }
/// ```
pub struct RelayRunner<C: RelayConfig> {
    /// Binary name for logging.
    name: String,
    /// Binary version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shutdown broadcast.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl<C: RelayConfig> RelayRunner<C> {
    /// Create a new runner, initializing logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&RelayArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| RelayError::config(e.to_string()))?;

        let runner = Self::without_tracing(name, config);
        tracing::info!(relay = %runner.name, version = %runner.version, "Starting");
        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_tracing(name: impl Into<String>, config: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Get the binary name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the binary version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// A receiver that flips to `true` when shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a worker task.
    ///
    /// The task is expected to exit on its own once the shutdown signal
    /// fires; stragglers are aborted after a grace period.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push((name.into(), handle));
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %worker, error = %e, "Worker failed");
            }
        });
        self.tasks.push((name, handle));
    }

    /// Run until Ctrl+C or SIGTERM is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` completes.
    ///
    /// This will:
    /// 1. Wait for `stop`
    /// 2. Broadcast shutdown to all tasks
    /// 3. Wait up to the grace period for tasks to finish
    /// 4. Abort whatever is still running
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            relay = %self.name,
            tasks = self.tasks.len(),
            "Running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(relay = %self.name, "Received shutdown signal");

        // Receivers may all be gone already; that is fine.
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(worker = %name, "Worker stopped"),
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(worker = %name, "Worker panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(worker = %name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!(relay = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl RelayConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn runner() -> RelayRunner<TestConfig> {
        RelayRunner::without_tracing(
            "test",
            TestConfig {
                logging: LoggingConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_workers_observe_shutdown() {
        let mut runner = runner();
        let stopped = Arc::new(AtomicBool::new(false));

        let mut shutdown = runner.shutdown_signal();
        let flag = stopped.clone();
        runner.spawn("waiter", async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(runner.task_count(), 1);

        runner.run_until(async {}).await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_aborted() {
        let mut runner = runner();
        runner.spawn("stuck", std::future::pending::<()>());

        let started = tokio::time::Instant::now();
        runner.run_until(async {}).await.unwrap();
        assert!(started.elapsed() >= SHUTDOWN_GRACE);
    }

    #[tokio::test]
    async fn test_failing_worker_is_logged_not_fatal() {
        let mut runner = runner();
        runner.spawn_with_error("fails", async { Err::<(), _>("boom") });
        runner.run_until(async {}).await.unwrap();
    }
}
