//! Process supervision and graceful shutdown.
//!
//! ## Architecture
//!
//! - [`ShutdownHandler`]: cleanup hooks (registry deregistration, pool close)
//! - [`ShutdownCoordinator`]: broadcasts the shutdown signal and runs the
//!   handlers in parallel under a timeout, at most once
//! - [`Supervisor`]: owns the long-lived task handles and the
//!   [`ServiceEvent`] channel, and turns the first trigger into one shutdown
//! - [`wait_for_signal`]: resolves on SIGTERM or Ctrl+C
//!
//! ```text
//!  signal ─────┐
//!  Fatal event ├──► Supervisor ──► broadcast ──► drain tasks (grace) ──► handlers ──► ShutdownReport
//!  task exit ──┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
//! coordinator.register(Arc::new(deregister_handler));
//!
//! let mut supervisor = Supervisor::new(coordinator, Duration::from_secs(15));
//! supervisor.spawn("consumer", consumer.run());
//! let report = supervisor.run(wait_for_signal()).await;
//! ```

use async_trait::async_trait;
use futures::future::select_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Events long-lived components send to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A dependency is gone for good; the process must stop.
    Fatal {
        /// Reporting component
        component: &'static str,
        /// What was lost
        reason: String,
    },
}

/// Sending half of the supervisor's event channel.
#[derive(Debug, Clone)]
pub struct ServiceEvents {
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl ServiceEvents {
    /// Create a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a fatal condition. Ignored once the supervisor has stopped listening.
    pub fn fatal(&self, component: &'static str, reason: impl Into<String>) {
        let reason = reason.into();
        error!(component, reason = %reason, "Fatal condition reported to supervisor");
        let _ = self.tx.send(ServiceEvent::Fatal { component, reason });
    }
}

/// Trait for components that need graceful shutdown.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    /// Release the component's resources.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; shutdown continues regardless.
    async fn shutdown(&self) -> Result<(), String>;
}

/// Broadcasts shutdown and runs the registered handlers.
///
/// Handlers run in parallel, each bounded by the coordinator timeout.
/// [`ShutdownCoordinator::shutdown`] runs them at most once; later calls
/// are no-ops.
pub struct ShutdownCoordinator {
    handlers: Vec<Arc<dyn ShutdownHandler>>,
    shutdown_tx: broadcast::Sender<()>,
    timeout_duration: Duration,
    signalled: AtomicBool,
    completed: AtomicBool,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose handlers get `timeout` each.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            handlers: Vec::new(),
            shutdown_tx,
            timeout_duration: timeout,
            signalled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Register a shutdown handler.
    pub fn register(&mut self, handler: Arc<dyn ShutdownHandler>) {
        info!(handler = handler.name(), "Registered shutdown handler");
        self.handlers.push(handler);
    }

    /// Receiver that resolves when shutdown starts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Send the shutdown broadcast (once).
    pub fn signal(&self) {
        if self.signalled.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.shutdown_tx.send(()).is_err() {
            warn!("No active shutdown signal receivers");
        }
    }

    /// Broadcast shutdown if not done yet, then run every handler.
    ///
    /// # Errors
    ///
    /// Returns one message per handler that failed or timed out.
    pub async fn shutdown(&self) -> Result<(), Vec<String>> {
        self.signal();
        if self.completed.swap(true, Ordering::SeqCst) {
            info!("Shutdown handlers already ran");
            return Ok(());
        }

        info!(
            handlers = self.handlers.len(),
            timeout = ?self.timeout_duration,
            "Running shutdown handlers"
        );

        let shutdown_futures = self.handlers.iter().map(|handler| async move {
            let name = handler.name();
            match tokio::time::timeout(self.timeout_duration, handler.shutdown()).await {
                Ok(Ok(())) => {
                    info!(handler = name, "Shutdown handler completed");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(handler = name, error = %e, "Shutdown handler failed");
                    Err(format!("{name}: {e}"))
                }
                Err(_) => {
                    error!(handler = name, "Shutdown handler timed out");
                    Err(format!("{name}: timeout after {:?}", self.timeout_duration))
                }
            }
        });

        let errors: Vec<String> = futures::future::join_all(shutdown_futures)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Number of registered handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Shutdown handler built from a closure.
///
/// ```ignore
/// let handler = GenericShutdownHandler::new("postgres-pool", move || {
///     let pool = pool.clone();
///     async move {
///         pool.close().await;
///         Ok(())
///     }
/// });
/// ```
pub struct GenericShutdownHandler {
    name: String,
    on_shutdown: Arc<
        dyn Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
            + Send
            + Sync,
    >,
}

impl GenericShutdownHandler {
    /// Create a handler named `name` that runs `on_shutdown`.
    pub fn new<F, Fut>(name: impl Into<String>, on_shutdown: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            on_shutdown: Arc::new(move || Box::pin(on_shutdown())),
        }
    }
}

#[async_trait]
impl ShutdownHandler for GenericShutdownHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) -> Result<(), String> {
        (self.on_shutdown)().await
    }
}

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT / SIGTERM
    Signal,
    /// A component reported a fatal condition
    Fatal {
        /// Reporting component
        component: &'static str,
        /// What was lost
        reason: String,
    },
    /// A supervised task ended on its own
    TaskExited {
        /// Name of the task
        task: String,
    },
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "termination signal"),
            Self::Fatal { component, reason } => write!(f, "fatal error in {component}: {reason}"),
            Self::TaskExited { task } => write!(f, "task '{task}' exited unexpectedly"),
        }
    }
}

/// Outcome of a supervised run.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// First trigger observed
    pub cause: ShutdownCause,
    /// Tasks that did not finish within the grace period and were aborted
    pub abandoned_tasks: Vec<String>,
    /// Shutdown handler failures
    pub handler_errors: Vec<String>,
}

impl ShutdownReport {
    /// Whether every task drained and every handler succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.abandoned_tasks.is_empty() && self.handler_errors.is_empty()
    }
}

/// Owns the long-lived tasks and runs the single shutdown path.
pub struct Supervisor {
    coordinator: ShutdownCoordinator,
    tasks: Vec<(String, JoinHandle<()>)>,
    events_tx: ServiceEvents,
    events_rx: mpsc::UnboundedReceiver<ServiceEvent>,
    grace: Duration,
}

impl Supervisor {
    /// Create a supervisor. `grace` bounds how long tasks get to drain.
    #[must_use]
    pub fn new(coordinator: ShutdownCoordinator, grace: Duration) -> Self {
        let (events_tx, events_rx) = ServiceEvents::channel();
        Self {
            coordinator,
            tasks: Vec::new(),
            events_tx,
            events_rx,
            grace,
        }
    }

    /// Sender for [`ServiceEvent`]s.
    #[must_use]
    pub fn events(&self) -> ServiceEvents {
        self.events_tx.clone()
    }

    /// Receiver for the shutdown broadcast.
    #[must_use]
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.coordinator.subscribe()
    }

    /// Spawn and supervise `task`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.watch(name, tokio::spawn(task));
    }

    /// Supervise an already spawned task.
    pub fn watch(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        info!(task = %name, "Supervising task");
        self.tasks.push((name, handle));
    }

    /// Run until the first trigger, then shut down exactly once.
    pub async fn run<S>(mut self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        let cause = self.wait_for_trigger(signal).await;
        info!(cause = %cause, "Shutdown triggered");

        self.coordinator.signal();
        let abandoned_tasks = self.drain_tasks().await;
        let handler_errors = self.coordinator.shutdown().await.err().unwrap_or_default();

        let report = ShutdownReport {
            cause,
            abandoned_tasks,
            handler_errors,
        };
        if report.is_clean() {
            info!(cause = %report.cause, "Graceful shutdown complete");
        } else {
            warn!(
                cause = %report.cause,
                abandoned = ?report.abandoned_tasks,
                errors = ?report.handler_errors,
                "Shutdown completed with problems"
            );
        }
        report
    }

    async fn wait_for_trigger<S>(&mut self, signal: S) -> ShutdownCause
    where
        S: Future<Output = ()>,
    {
        enum Trigger {
            Signal,
            Event(ServiceEvent),
            Exit(usize),
        }

        let tasks = &mut self.tasks;
        let events_rx = &mut self.events_rx;
        let first_exit = async move {
            if tasks.is_empty() {
                return std::future::pending::<usize>().await;
            }
            let (result, index, _) = select_all(tasks.iter_mut().map(|(_, handle)| handle)).await;
            if let Err(e) = result {
                error!(error = %e, "Supervised task panicked or was cancelled");
            }
            index
        };

        let trigger = tokio::select! {
            biased;
            () = signal => Trigger::Signal,
            Some(event) = events_rx.recv() => Trigger::Event(event),
            index = first_exit => Trigger::Exit(index),
        };

        match trigger {
            Trigger::Signal => ShutdownCause::Signal,
            Trigger::Event(ServiceEvent::Fatal { component, reason }) => {
                ShutdownCause::Fatal { component, reason }
            }
            Trigger::Exit(index) => {
                let (task, _) = self.tasks.remove(index);
                warn!(task = %task, "Supervised task exited");
                ShutdownCause::TaskExited { task }
            }
        }
    }

    async fn drain_tasks(&mut self) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut abandoned = Vec::new();

        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = %name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed during shutdown"),
                Err(_) => {
                    warn!(task = %name, "Task did not stop within grace period, aborting");
                    handle.abort();
                    abandoned.push(name);
                }
            }
        }
        abandoned
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If no signal handler can be installed the future never resolves and the
/// process can only stop through the other supervisor triggers.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl CountingHandler {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ShutdownHandler for CountingHandler {
        fn name(&self) -> &str {
            self.name
        }

        async fn shutdown(&self) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_coordinator_runs_handlers_once() {
        let handler = CountingHandler::new("registry", false);
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register(handler.clone());

        assert!(coordinator.shutdown().await.is_ok());
        assert!(coordinator.shutdown().await.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coordinator_collects_failures_and_timeouts() {
        struct Slow;

        #[async_trait]
        impl ShutdownHandler for Slow {
            fn name(&self) -> &str {
                "slow"
            }

            async fn shutdown(&self) -> Result<(), String> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        }

        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.register(CountingHandler::new("pool", true));
        coordinator.register(Arc::new(Slow));

        let errors = coordinator.shutdown().await.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("pool")));
        assert!(errors.iter().any(|e| e.contains("timeout")));
    }

    #[tokio::test]
    async fn test_generic_handler_runs_closure() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let handler = GenericShutdownHandler::new("flag", move || {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(handler.shutdown().await.is_ok());
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_signal_triggers_broadcast_and_handlers() {
        let handler = CountingHandler::new("registry", false);
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register(handler.clone());

        let mut supervisor = Supervisor::new(coordinator, Duration::from_secs(1));
        let mut rx = supervisor.shutdown_signal();
        supervisor.spawn("worker", async move {
            let _ = rx.recv().await;
        });

        let report = supervisor.run(async {}).await;
        assert_eq!(report.cause, ShutdownCause::Signal);
        assert!(report.is_clean());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_event_triggers_shutdown() {
        let supervisor = Supervisor::new(ShutdownCoordinator::new(Duration::from_secs(1)), Duration::from_secs(1));
        supervisor.events().fatal("store", "pool closed");

        let report = supervisor.run(std::future::pending()).await;
        assert_eq!(
            report.cause,
            ShutdownCause::Fatal {
                component: "store",
                reason: "pool closed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_task_exit_triggers_shutdown() {
        let mut supervisor = Supervisor::new(ShutdownCoordinator::new(Duration::from_secs(1)), Duration::from_secs(1));
        let mut rx = supervisor.shutdown_signal();
        supervisor.spawn("reporter", async move {
            let _ = rx.recv().await;
        });
        supervisor.spawn("consumer", async {});

        let report = supervisor.run(std::future::pending()).await;
        assert_eq!(
            report.cause,
            ShutdownCause::TaskExited {
                task: "consumer".to_string()
            }
        );
        assert!(report.abandoned_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_task_is_abandoned_after_grace() {
        let mut supervisor = Supervisor::new(ShutdownCoordinator::new(Duration::from_secs(1)), Duration::from_millis(50));
        supervisor.spawn("stuck", std::future::pending());

        let report = supervisor.run(async {}).await;
        assert_eq!(report.abandoned_tasks, vec!["stuck".to_string()]);
    }
}
