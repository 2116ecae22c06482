//! Configuration management for the order service.
//!
//! Loaded once at start from environment variables (after an optional
//! `.env` file), with defaults for local development. There is no reload.

use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, reported before anything starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        /// Environment variable name
        var: &'static str,
        /// Offending value
        value: String,
        /// What was expected
        reason: String,
    },

    /// Two settings contradict each other
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP gateway
    pub server: ServerConfig,
    /// `PostgreSQL` order store
    pub postgres: PostgresConfig,
    /// Message bus
    pub bus: BusConfig,
    /// Service registry
    pub registry: RegistryConfig,
    /// Orchestration limits and shutdown
    pub runtime: RuntimeConfig,
    /// Logging, tracing and metrics
    pub telemetry: TelemetryConfig,
}

/// HTTP gateway configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (`host:port`)
    pub bind_addr: String,
    /// Per-request deadline
    pub request_timeout: Duration,
}

/// `PostgreSQL` configuration
#[derive(Clone)]
pub struct PostgresConfig {
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
    /// User
    pub user: String,
    /// Password
    pub password: String,
    /// Database name
    pub database: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Connection options for sqlx.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Message bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bootstrap servers (comma-separated)
    pub brokers: String,
    /// Topic carrying place-order commands
    pub place_order_subject: String,
    /// Consumer group shared by all instances
    pub consumer_group: String,
}

/// Service registry configuration
#[derive(Clone)]
pub struct RegistryConfig {
    /// Consul agent URL
    pub addr: String,
    /// Registered service name
    pub service_name: String,
    /// Address other services should dial
    pub advertise_host: String,
    /// Heartbeat interval
    pub health_interval: Duration,
    /// Health-check TTL
    pub health_ttl: Duration,
    /// Deadline for registry calls
    pub timeout: Duration,
    /// ACL token, if the agent requires one
    pub token: Option<String>,
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("addr", &self.addr)
            .field("service_name", &self.service_name)
            .field("advertise_host", &self.advertise_host)
            .field("health_interval", &self.health_interval)
            .field("health_ttl", &self.health_ttl)
            .field("timeout", &self.timeout)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Orchestration limits and shutdown
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Failed placement attempts before an order is recorded as `Failed`
    pub retry_ceiling: u32,
    /// Deadline for each order store call
    pub store_timeout: Duration,
    /// Global drain deadline at shutdown
    pub shutdown_grace: Duration,
}

/// Logging, tracing and metrics
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter directives
    pub log_filter: String,
    /// Jaeger agent `host:port`; `None` disables span export
    pub tracer_endpoint: Option<String>,
    /// Prometheus listener; `None` disables the exporter
    pub metrics_addr: Option<SocketAddr>,
}

const DEFAULT_LOG_FILTER: &str = "order_service=info,order_intake=info,tower_http=info";

impl Config {
    /// Load configuration from the environment, after reading `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` (an environment stand-in).
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let (db_host, db_port) = parse_host_port(
            "DBHOST",
            &env.string("DBHOST", "localhost:5432"),
            5432,
        )?;

        let config = Self {
            server: ServerConfig {
                bind_addr: normalize_bind_addr(&env.string("HTTPPORT", "0.0.0.0:8080"))?,
                request_timeout: env.secs("REQUEST_TIMEOUT_SECS", 10)?,
            },
            postgres: PostgresConfig {
                host: db_host,
                port: db_port,
                user: env.string("DBUSER", "postgres"),
                password: env.string("DBPASSWORD", "postgres"),
                database: env.string("DBNAME", "orders"),
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            bus: BusConfig {
                brokers: env.string("BUS_BROKERS", "localhost:9092"),
                place_order_subject: env.string("PLACE_ORDER_SUBJECT", "order.place"),
                consumer_group: env.string("BUS_CONSUMER_GROUP", "order-service"),
            },
            registry: RegistryConfig {
                addr: env.string("REGISTRY_ADDR", "http://localhost:8500"),
                service_name: env.string("SERVICE_NAME", "order-service"),
                advertise_host: env.string("SERVICE_ADVERTISE_HOST", "127.0.0.1"),
                health_interval: env.secs("HEALTH_INTERVAL_SECS", 5)?,
                health_ttl: env.secs("HEALTH_TTL_SECS", 15)?,
                timeout: env.secs("REGISTRY_TIMEOUT_SECS", 5)?,
                token: env.get("REGISTRY_TOKEN"),
            },
            runtime: RuntimeConfig {
                retry_ceiling: env.parse("RETRY_CEILING", 5)?,
                store_timeout: env.secs("STORE_TIMEOUT_SECS", 5)?,
                shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", 15)?,
            },
            telemetry: TelemetryConfig {
                log_filter: env
                    .get("RUST_LOG")
                    .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
                tracer_endpoint: env.get("TRACER_ENDPOINT"),
                metrics_addr: env.optional("METRICS_ADDR")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.retry_ceiling == 0 {
            return Err(ConfigError::Invalid {
                var: "RETRY_CEILING",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.postgres.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.registry.health_interval >= self.registry.health_ttl {
            return Err(ConfigError::Inconsistent(format!(
                "HEALTH_INTERVAL_SECS ({}s) must be shorter than HEALTH_TTL_SECS ({}s)",
                self.registry.health_interval.as_secs(),
                self.registry.health_ttl.as_secs()
            )));
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(var)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(var, default)?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }
}

/// `:8080` → `0.0.0.0:8080`; `host:port` is kept after validating the port.
fn normalize_bind_addr(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    let addr = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else if raw.chars().all(|c| c.is_ascii_digit()) {
        format!("0.0.0.0:{raw}")
    } else {
        raw.to_string()
    };
    parse_host_port("HTTPPORT", &addr, 0)?;
    Ok(addr)
}

/// Split `host[:port]`, falling back to `default_port` when no port is given.
fn parse_host_port(
    var: &'static str,
    raw: &str,
    default_port: u16,
) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match raw.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid("port must be 0-65535"))?;
            if host.is_empty() {
                return Err(invalid("host must not be empty"));
            }
            Ok((host.to_string(), port))
        }
        None if default_port > 0 && !raw.is_empty() => Ok((raw.to_string(), default_port)),
        None => Err(invalid("expected host:port")),
    }
}
