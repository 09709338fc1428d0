//! Queue and worker configuration
//!
//! `QueueOptions` mirrors the options a host passes when it creates a queue:
//! `timeout`, `connection` (a.k.a. `parameters`), `leaseSeconds` (a.k.a.
//! `expire`), `clientOptions` and `backend`. It deserializes from JSON or
//! TOML and can be loaded from the environment.

use crate::error::{QueueError, Result};
use core_config::redis::RedisConfig;
use core_config::{env_parse, ConfigError, FromEnv};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tokio::time::Instant;

/// Default blocking wait when a caller passes no timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1;

/// Default reservation lease.
pub const DEFAULT_LEASE_SECS: u64 = 60;

/// Which store backs a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

/// Store-client tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// Give up connecting after this many milliseconds.
    #[serde(alias = "connection_timeout_ms")]
    pub connection_timeout_ms: Option<u64>,

    /// Give up on a non-blocking command after this many milliseconds.
    /// Blocking waits get this on top of their own timeout.
    #[serde(alias = "response_timeout_ms")]
    pub response_timeout_ms: Option<u64>,

    /// Reconnect attempts made by the connection manager.
    #[serde(alias = "number_of_retries")]
    pub number_of_retries: Option<usize>,
}

impl ClientOptions {
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms.map(Duration::from_millis)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// Options for a single queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueOptions {
    /// Default blocking wait in seconds; 0 blocks indefinitely.
    pub timeout: u64,

    /// Store endpoint. `None` means the default endpoint.
    #[serde(alias = "parameters")]
    pub connection: Option<String>,

    /// Reservation lease in seconds.
    #[serde(alias = "expire", alias = "lease_seconds")]
    pub lease_seconds: u64,

    #[serde(alias = "client_options", alias = "options")]
    pub client_options: ClientOptions,

    pub backend: Backend,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            connection: None,
            lease_seconds: DEFAULT_LEASE_SECS,
            client_options: ClientOptions::default(),
            backend: Backend::Redis,
        }
    }
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default blocking wait (0 blocks indefinitely)
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Set the store endpoint
    pub fn with_connection(mut self, url: impl Into<String>) -> Self {
        self.connection = Some(url.into());
        self
    }

    /// Set the reservation lease
    pub fn with_lease_seconds(mut self, secs: u64) -> Self {
        self.lease_seconds = secs;
        self
    }

    pub fn with_client_options(mut self, client_options: ClientOptions) -> Self {
        self.client_options = client_options;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// Endpoint to connect to, falling back to the default one.
    pub fn connection_url(&self) -> String {
        self.connection
            .clone()
            .unwrap_or_else(|| RedisConfig::default().build_url())
    }

    /// Reject options no queue can be built from.
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(QueueError::config("queue name must not be empty"));
        }
        if name.contains(char::is_whitespace) {
            return Err(QueueError::config(format!(
                "queue name '{}' must not contain whitespace",
                name
            )));
        }
        if self.lease_seconds == 0 {
            return Err(QueueError::config("leaseSeconds must be greater than zero"));
        }
        if let Some(connection) = &self.connection
            && connection.trim().is_empty()
        {
            return Err(QueueError::config("connection must not be empty when given"));
        }
        Ok(())
    }
}

impl FromEnv for QueueOptions {
    /// Environment variables (all optional):
    /// - `JOBQUEUE_REDIS_URL` / `REDIS_URL` / `REDIS_HOST` + `REDIS_DATABASE`
    /// - `JOBQUEUE_TIMEOUT_SECS`
    /// - `JOBQUEUE_LEASE_SECS`
    /// - `JOBQUEUE_BACKEND` (`redis` or `memory`)
    fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut options = Self::default();

        match RedisConfig::from_env() {
            Ok(redis) => options.connection = Some(redis.build_url()),
            Err(ConfigError::MissingEnvVar(_)) => {}
            Err(e) => return Err(e),
        }
        if let Some(timeout) = env_parse("JOBQUEUE_TIMEOUT_SECS")? {
            options.timeout = timeout;
        }
        if let Some(lease) = env_parse("JOBQUEUE_LEASE_SECS")? {
            options.lease_seconds = lease;
        }
        if let Some(backend) = env_parse("JOBQUEUE_BACKEND")? {
            options.backend = backend;
        }

        Ok(options)
    }
}

/// How long a blocking read may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFor {
    Forever,
    Duration(Duration),
}

impl BlockFor {
    /// Normalize a caller's timeout against the queue default.
    ///
    /// `None` means "use the default"; a zero duration, requested or
    /// configured, blocks indefinitely (the store's own convention).
    pub fn normalize(requested: Option<Duration>, default: Duration) -> Self {
        let timeout = requested.unwrap_or(default);
        if timeout.is_zero() {
            BlockFor::Forever
        } else {
            BlockFor::Duration(timeout)
        }
    }

    /// Timeout argument for blocking store commands.
    ///
    /// The store truncates to milliseconds and treats 0 as forever, so
    /// finite waits are clamped to at least one millisecond.
    pub fn as_store_secs(&self) -> f64 {
        match self {
            BlockFor::Forever => 0.0,
            BlockFor::Duration(d) => d.as_secs_f64().max(0.001),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            BlockFor::Forever => None,
            BlockFor::Duration(d) => Some(Instant::now() + *d),
        }
    }

    /// Wait remaining until `deadline`, `None` once it has passed.
    pub fn until(deadline: Option<Instant>) -> Option<Self> {
        match deadline {
            None => Some(BlockFor::Forever),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then_some(BlockFor::Duration(remaining))
            }
        }
    }
}

/// Configuration for the queue worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Blocking wait per reserve call; keeps shutdown responsive
    pub poll_timeout: Duration,

    /// Deliveries before a failing message is abandoned
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,

    /// Cap for retry delay and store-error backoff
    pub retry_max_delay: Duration,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }

    /// Set the blocking wait per reserve call
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the maximum deliveries per message
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the retry backoff bounds
    pub fn with_retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max.max(base);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = QueueOptions::default();

        assert_eq!(options.default_timeout(), Duration::from_secs(1));
        assert_eq!(options.lease(), Duration::from_secs(60));
        assert_eq!(options.backend, Backend::Redis);
        assert_eq!(options.connection_url(), "redis://127.0.0.1:6379/15");
    }

    #[test]
    fn test_deserialize_host_style_options() {
        let options: QueueOptions = serde_json::from_value(json!({
            "timeout": 5,
            "parameters": "redis://queue-host:6379/2",
            "expire": 120,
            "clientOptions": {"responseTimeoutMs": 250}
        }))
        .unwrap();

        assert_eq!(options.timeout, 5);
        assert_eq!(options.connection.as_deref(), Some("redis://queue-host:6379/2"));
        assert_eq!(options.lease_seconds, 120);
        assert_eq!(
            options.client_options.response_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_deserialize_canonical_names() {
        let options: QueueOptions = serde_json::from_value(json!({
            "connection": "redis://localhost",
            "leaseSeconds": 30,
            "backend": "memory"
        }))
        .unwrap();

        assert_eq!(options.lease_seconds, 30);
        assert_eq!(options.backend, Backend::Memory);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_validate() {
        let options = QueueOptions::default();
        assert!(options.validate("orders").is_ok());
        assert!(options.validate("").is_err());
        assert!(options.validate("two words").is_err());
        assert!(options.clone().with_lease_seconds(0).validate("orders").is_err());
        assert!(options.with_connection(" ").validate("orders").is_err());
    }

    #[test]
    fn test_block_for_normalization() {
        let default = Duration::from_secs(1);

        assert_eq!(BlockFor::normalize(None, default), BlockFor::Duration(default));
        assert_eq!(
            BlockFor::normalize(Some(Duration::from_secs(3)), default),
            BlockFor::Duration(Duration::from_secs(3))
        );
        assert_eq!(BlockFor::normalize(Some(Duration::ZERO), default), BlockFor::Forever);
        assert_eq!(BlockFor::normalize(None, Duration::ZERO), BlockFor::Forever);
    }

    #[test]
    fn test_block_for_store_secs() {
        assert_eq!(BlockFor::Forever.as_store_secs(), 0.0);
        assert_eq!(BlockFor::Duration(Duration::from_millis(1500)).as_store_secs(), 1.5);
        assert_eq!(BlockFor::Duration(Duration::from_micros(10)).as_store_secs(), 0.001);
    }

    #[test]
    fn test_block_for_until() {
        assert_eq!(BlockFor::until(None), Some(BlockFor::Forever));
        assert_eq!(BlockFor::until(Some(Instant::now())), None);
        assert!(matches!(
            BlockFor::until(Some(Instant::now() + Duration::from_secs(10))),
            Some(BlockFor::Duration(_))
        ));
    }

    #[test]
    fn test_options_from_env() {
        temp_env::with_vars(
            [
                ("JOBQUEUE_REDIS_URL", Some("redis://env-host:6379")),
                ("REDIS_DATABASE", Some("4")),
                ("JOBQUEUE_TIMEOUT_SECS", Some("0")),
                ("JOBQUEUE_LEASE_SECS", Some("15")),
                ("JOBQUEUE_BACKEND", Some("Memory")),
            ],
            || {
                let options = QueueOptions::from_env().unwrap();
                assert_eq!(options.connection.as_deref(), Some("redis://env-host:6379/4"));
                assert_eq!(options.timeout, 0);
                assert_eq!(options.lease_seconds, 15);
                assert_eq!(options.backend, Backend::Memory);
            },
        );
    }

    #[test]
    fn test_options_from_env_without_redis() {
        temp_env::with_vars(
            [
                ("JOBQUEUE_REDIS_URL", None::<&str>),
                ("REDIS_URL", None),
                ("REDIS_HOST", None),
                ("JOBQUEUE_TIMEOUT_SECS", None),
                ("JOBQUEUE_LEASE_SECS", None),
                ("JOBQUEUE_BACKEND", None),
            ],
            || {
                let options = QueueOptions::from_env().unwrap();
                assert_eq!(options, QueueOptions::default());
            },
        );
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::new()
            .with_max_attempts(0)
            .with_retry_delay(Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.retry_max_delay, Duration::from_secs(5));
    }
}
