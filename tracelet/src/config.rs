//! Client and delivery configuration.
//!
//! Every setting has a default and can be overridden from the environment,
//! so a bare `ClientConfig::default()` is enough for local operation.

use crate::retry::RetryPolicy;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};
use url::Url;

/// Name of the observed service.
pub(crate) const TRACELET_SERVICE_NAME: &str = "TRACELET_SERVICE_NAME";
/// Default service name.
pub(crate) const TRACELET_SERVICE_NAME_DEFAULT: &str = "tracelet";
/// Destination endpoint for delivery.
pub(crate) const TRACELET_ENDPOINT: &str = "TRACELET_ENDPOINT";
/// Default destination endpoint.
pub(crate) const TRACELET_ENDPOINT_DEFAULT: &str = "http://localhost:8200";
/// Authentication token; absence disables authenticated delivery.
pub(crate) const TRACELET_SECRET_TOKEN: &str = "TRACELET_SECRET_TOKEN";
/// Environment tag attached to the service metadata.
pub(crate) const TRACELET_ENVIRONMENT: &str = "TRACELET_ENVIRONMENT";
/// Default environment tag.
pub(crate) const TRACELET_ENVIRONMENT_DEFAULT: &str = "development";
/// Debug-logging flag.
pub(crate) const TRACELET_DEBUG: &str = "TRACELET_DEBUG";

/// Maximum queue size of the delivery worker.
pub(crate) const TRACELET_MAX_QUEUE_SIZE: &str = "TRACELET_MAX_QUEUE_SIZE";
/// Default maximum queue size.
pub(crate) const TRACELET_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum delivery retries per batch.
pub(crate) const TRACELET_MAX_RETRIES: &str = "TRACELET_MAX_RETRIES";
/// Initial retry delay in milliseconds.
pub(crate) const TRACELET_RETRY_INITIAL_DELAY: &str = "TRACELET_RETRY_INITIAL_DELAY";
/// Maximum retry delay in milliseconds.
pub(crate) const TRACELET_RETRY_MAX_DELAY: &str = "TRACELET_RETRY_MAX_DELAY";
/// Maximum allowed time for a forced flush, in milliseconds.
pub(crate) const TRACELET_FLUSH_TIMEOUT: &str = "TRACELET_FLUSH_TIMEOUT";
/// Default forced-flush timeout.
pub(crate) const TRACELET_FLUSH_TIMEOUT_DEFAULT: u64 = 5_000;
/// Maximum allowed time for shutdown to drain in-flight work, in milliseconds.
pub(crate) const TRACELET_SHUTDOWN_TIMEOUT: &str = "TRACELET_SHUTDOWN_TIMEOUT";
/// Default shutdown timeout.
pub(crate) const TRACELET_SHUTDOWN_TIMEOUT_DEFAULT: u64 = 5_000;

/// Identity of the observed service, handed to the sink before the first
/// delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceMeta {
    /// Service name.
    pub name: String,
    /// Deployment environment tag.
    pub environment: String,
}

/// Client configuration consumed at initialization.
#[derive(Clone)]
pub struct ClientConfig {
    /// Name of the observed service.
    pub service_name: String,
    /// Destination endpoint. A network sink would deliver here; local sinks
    /// ignore it.
    pub endpoint: Url,
    /// Authentication token. `None` disables authenticated delivery but does
    /// not prevent local operation.
    pub secret_token: Option<String>,
    /// Deployment environment tag.
    pub environment: String,
    /// Emit per-batch debug logging from the delivery worker.
    pub debug: bool,
}

impl fmt::Debug for ClientConfig {
    // The token is opaque and stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("service_name", &self.service_name)
            .field("endpoint", &self.endpoint.as_str())
            .field("secret_token", &self.secret_token.as_ref().map(|_| "***"))
            .field("environment", &self.environment)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::default().build()
    }
}

impl ClientConfig {
    /// Returns a builder initialized from defaults and environment variables.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The service metadata stamped on delivered batches.
    pub fn service_meta(&self) -> ServiceMeta {
        ServiceMeta {
            name: self.service_name.clone(),
            environment: self.environment.clone(),
        }
    }
}

/// A builder for [`ClientConfig`].
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
    service_name: String,
    endpoint: Url,
    secret_token: Option<String>,
    environment: String,
    debug: bool,
}

impl Default for ClientConfigBuilder {
    /// Create a builder initialized with default values, overridden by
    /// environment variables if set. The supported environment variables are:
    /// * `TRACELET_SERVICE_NAME`
    /// * `TRACELET_ENDPOINT`
    /// * `TRACELET_SECRET_TOKEN`
    /// * `TRACELET_ENVIRONMENT`
    /// * `TRACELET_DEBUG`
    fn default() -> Self {
        let endpoint = Url::parse(TRACELET_ENDPOINT_DEFAULT)
            .expect("default endpoint is a valid url");
        ClientConfigBuilder {
            service_name: TRACELET_SERVICE_NAME_DEFAULT.to_owned(),
            endpoint,
            secret_token: None,
            environment: TRACELET_ENVIRONMENT_DEFAULT.to_owned(),
            debug: false,
        }
        .init_from_env_vars()
    }
}

impl ClientConfigBuilder {
    /// Set the service name.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Set the delivery endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the authentication token.
    pub fn with_secret_token(mut self, token: impl Into<String>) -> Self {
        self.secret_token = Some(token.into());
        self
    }

    /// Set the environment tag.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Enable or disable per-batch debug logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builds the [`ClientConfig`].
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            service_name: self.service_name,
            endpoint: self.endpoint,
            secret_token: self.secret_token,
            environment: self.environment,
            debug: self.debug,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Ok(service_name) = env::var(TRACELET_SERVICE_NAME) {
            if !service_name.is_empty() {
                self.service_name = service_name;
            }
        }

        // Unparseable endpoints are ignored rather than failing init.
        if let Some(endpoint) = env::var(TRACELET_ENDPOINT)
            .ok()
            .and_then(|raw| Url::parse(&raw).ok())
        {
            self.endpoint = endpoint;
        }

        if let Ok(token) = env::var(TRACELET_SECRET_TOKEN) {
            if !token.is_empty() {
                self.secret_token = Some(token);
            }
        }

        if let Ok(environment) = env::var(TRACELET_ENVIRONMENT) {
            if !environment.is_empty() {
                self.environment = environment;
            }
        }

        if let Ok(debug) = env::var(TRACELET_DEBUG) {
            self.debug = matches!(debug.as_str(), "1" | "true" | "TRUE" | "True");
        }

        self
    }
}

/// Delivery worker configuration.
#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    /// The maximum queue size between producers and the delivery worker. If
    /// the queue gets full, events and batches are dropped, never blocked on.
    pub(crate) max_queue_size: usize,
    /// Retry policy applied per batch.
    pub(crate) retry: RetryPolicy,
    /// Bounded wait for a forced flush.
    pub(crate) flush_timeout: Duration,
    /// Bounded wait for shutdown to drain in-flight work.
    pub(crate) shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfigBuilder::default().build()
    }
}

impl DeliveryConfig {
    /// Returns a builder initialized from defaults and environment variables.
    pub fn builder() -> DeliveryConfigBuilder {
        DeliveryConfigBuilder::default()
    }
}

/// A builder for [`DeliveryConfig`].
#[derive(Clone, Debug)]
pub struct DeliveryConfigBuilder {
    max_queue_size: usize,
    retry: RetryPolicy,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for DeliveryConfigBuilder {
    /// Create a builder initialized with default values, overridden by
    /// environment variables if set. The supported environment variables are:
    /// * `TRACELET_MAX_QUEUE_SIZE`
    /// * `TRACELET_MAX_RETRIES`
    /// * `TRACELET_RETRY_INITIAL_DELAY`
    /// * `TRACELET_RETRY_MAX_DELAY`
    /// * `TRACELET_FLUSH_TIMEOUT`
    /// * `TRACELET_SHUTDOWN_TIMEOUT`
    fn default() -> Self {
        DeliveryConfigBuilder {
            max_queue_size: TRACELET_MAX_QUEUE_SIZE_DEFAULT,
            retry: RetryPolicy::default(),
            flush_timeout: Duration::from_millis(TRACELET_FLUSH_TIMEOUT_DEFAULT),
            shutdown_timeout: Duration::from_millis(TRACELET_SHUTDOWN_TIMEOUT_DEFAULT),
        }
        .init_from_env_vars()
    }
}

impl DeliveryConfigBuilder {
    /// Set the maximum queue size of the delivery worker.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size.max(1);
        self
    }

    /// Set the per-batch retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the bounded wait for forced flushes.
    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// Set the bounded wait for shutdown.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds the [`DeliveryConfig`].
    pub fn build(mut self) -> DeliveryConfig {
        // The retry ceiling must not be below the initial delay.
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            self.retry.max_delay_ms = self.retry.initial_delay_ms;
        }
        DeliveryConfig {
            max_queue_size: self.max_queue_size,
            retry: self.retry,
            flush_timeout: self.flush_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env::var(TRACELET_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size.max(1);
        }

        if let Some(max_retries) = env::var(TRACELET_MAX_RETRIES)
            .ok()
            .and_then(|retries| usize::from_str(&retries).ok())
        {
            self.retry.max_retries = max_retries;
        }

        if let Some(initial_delay) = env::var(TRACELET_RETRY_INITIAL_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.retry.initial_delay_ms = initial_delay;
        }

        if let Some(max_delay) = env::var(TRACELET_RETRY_MAX_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.retry.max_delay_ms = max_delay;
        }

        // The retry ceiling must not be below the initial delay.
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            self.retry.max_delay_ms = self.retry.initial_delay_ms;
        }

        if let Some(flush_timeout) = env::var(TRACELET_FLUSH_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.flush_timeout = Duration::from_millis(flush_timeout);
        }

        if let Some(shutdown_timeout) = env::var(TRACELET_SHUTDOWN_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.shutdown_timeout = Duration::from_millis(shutdown_timeout);
        }

        self
    }
}
