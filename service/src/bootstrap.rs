//! Startup and wiring.
//!
//! Everything that can fail before the service is useful happens in
//! [`Application::start`]: the store connection, migrations, the bus client,
//! the HTTP listener and registry registration. Once `start` returns, the
//! long-lived tasks are running under a [`Supervisor`] and the only way out is
//! [`Application::run`].

use crate::config::Config;
use anyhow::Context;
use order_intake_consul::ConsulRegistry;
use order_intake_core::{FailureReport, MessageBus, OrderStore, ServiceRegistration, ServiceRegistry};
use order_intake_postgres::{FailureLog, PostgresOrderStore, migrate};
use order_intake_redpanda::RedpandaMessageBus;
use order_intake_runtime::{
    DeregisterOnShutdown, GenericShutdownHandler, LivenessReporter, Orchestrator,
    PlaceOrderConsumer, RegistrationHandle, RetryPolicy, ShutdownCoordinator, ShutdownReport,
    Supervisor, metrics::MetricsServer,
};
use order_intake_web::{AppState, router, serve};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A started service, waiting to be run.
pub struct Application {
    supervisor: Supervisor,
    local_addr: SocketAddr,
    service_id: String,
}

impl Application {
    /// Connect to every dependency, register with the registry and spawn the
    /// long-lived tasks.
    ///
    /// Nothing is registered until the store, bus and listener are ready, so a
    /// failed start never leaves a registry entry behind.
    ///
    /// # Errors
    ///
    /// Returns an error if any dependency cannot be reached or the registry
    /// refuses the registration after retries.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        if let Some(addr) = config.telemetry.metrics_addr {
            MetricsServer::new(addr)
                .start()
                .context("failed to start metrics exporter")?;
        }

        // Store
        let store = Arc::new(
            PostgresOrderStore::connect_with(
                config.postgres.connect_options(),
                config.postgres.max_connections,
                config.runtime.store_timeout,
            )
            .await
            .context("failed to connect to PostgreSQL")?,
        );
        migrate(store.pool())
            .await
            .context("failed to apply database migrations")?;
        info!(
            host = %config.postgres.host,
            database = %config.postgres.database,
            "Order store ready"
        );

        // Bus
        let bus: Arc<dyn MessageBus> = Arc::new(
            RedpandaMessageBus::builder()
                .brokers(config.bus.brokers.clone())
                .consumer_group(config.bus.consumer_group.clone())
                .build()
                .context("failed to create message bus client")?,
        );

        // Registry
        let mut consul = ConsulRegistry::with_timeout(&config.registry.addr, config.registry.timeout)
            .context("failed to create registry client")?;
        if let Some(token) = &config.registry.token {
            consul = consul.with_token(token.clone());
        }
        let registry: Arc<dyn ServiceRegistry> = Arc::new(consul);

        // Listener and registration
        let listener = TcpListener::bind(&config.server.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
        let local_addr = listener.local_addr().context("listener has no local address")?;

        let registration = ServiceRegistration {
            id: format!("{}-{}", config.registry.service_name, uuid::Uuid::new_v4()),
            name: config.registry.service_name.clone(),
            address: config.registry.advertise_host.clone(),
            port: local_addr.port(),
            ttl: config.registry.health_ttl,
            tags: vec![format!("version={}", env!("CARGO_PKG_VERSION"))],
        };
        let service_id = registration.id.clone();
        let handle = RegistrationHandle::register(
            registry.as_ref(),
            registration,
            &registration_policy(),
        )
        .await
        .context("failed to register with service registry")?;

        // Handlers run once every task has drained
        let mut coordinator = ShutdownCoordinator::new(config.runtime.shutdown_grace);
        let reporter = LivenessReporter::new(
            registry.clone(),
            &handle,
            config.registry.health_interval,
            coordinator.subscribe(),
        );
        coordinator.register(Arc::new(DeregisterOnShutdown::new(
            registry,
            handle,
            config.registry.timeout,
        )));

        let pool_store = store.clone();
        coordinator.register(Arc::new(GenericShutdownHandler::new("postgres-pool", move || {
            let store = pool_store.clone();
            async move {
                store.close().await;
                Ok(())
            }
        })));

        let mut supervisor = Supervisor::new(coordinator, config.runtime.shutdown_grace);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let orchestrator = Arc::new(
            Orchestrator::new(store.clone() as Arc<dyn OrderStore>)
                .with_retry_ceiling(config.runtime.retry_ceiling)
                .with_store_timeout(config.runtime.store_timeout)
                .with_failure_reports(failure_tx)
                .with_service_events(supervisor.events()),
        );

        // Tasks
        let consumer = PlaceOrderConsumer::new(
            config.bus.place_order_subject.clone(),
            bus,
            orchestrator.clone(),
            supervisor.shutdown_signal(),
        )
        .with_service_events(supervisor.events());
        supervisor.spawn("consumer", consumer.run());

        supervisor.spawn("liveness-reporter", reporter.run());

        let app = router(
            AppState::new(orchestrator).with_version(env!("CARGO_PKG_VERSION")),
            config.server.request_timeout,
        );
        let http_shutdown = supervisor.shutdown_signal();
        let http_events = supervisor.events();
        supervisor.spawn("http", async move {
            if let Err(e) = serve(listener, app, http_shutdown).await {
                http_events.fatal("http", e.to_string());
            }
        });

        let failure_log = FailureLog::new(store.pool().clone());
        supervisor.spawn("failure-log", record_failures(failure_log, failure_rx));

        info!(
            service_id = %service_id,
            addr = %local_addr,
            subject = %config.bus.place_order_subject,
            "Order service started"
        );

        Ok(Self {
            supervisor,
            local_addr,
            service_id,
        })
    }

    /// Address the HTTP gateway is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry id of this instance
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Run until `signal` resolves, a component reports a fatal error, or a
    /// task exits; then shut down once.
    pub async fn run<S>(self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        self.supervisor.run(signal).await
    }
}

/// Registration at startup: the agent usually runs next to us, so a handful
/// of quick attempts.
fn registration_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(200))
        .max_delay(Duration::from_secs(5))
        .jitter(true)
        .build()
}

/// Persist failure reports until every orchestrator handle is gone.
///
/// The channel closes only after the consumer and the HTTP gateway have
/// stopped, so reports produced while draining are still recorded.
async fn record_failures(log: FailureLog, mut reports: mpsc::UnboundedReceiver<FailureReport>) {
    while let Some(report) = reports.recv().await {
        match log.record(&report).await {
            Ok(entry) => warn!(
                entry,
                order_id = %report.order_id,
                idempotency_key = %report.idempotency_key,
                attempts = report.attempts,
                "Order recorded as failed"
            ),
            Err(e) => error!(
                error = %e,
                order_id = %report.order_id,
                last_error = %report.last_error,
                "Failed to persist failure report"
            ),
        }
    }
    info!("Failure log drained");
}
