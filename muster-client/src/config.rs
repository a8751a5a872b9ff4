//! Client configuration
//!
//! Settings for one correlation client: its own broker identity, the
//! directory endpoint answering inventory queries, and the default timeout
//! and retry budgets for requests and polls. Every value has a sensible
//! default; a client can be built from `ClientConfig::default()` alone.

use muster_core::identity::TargetIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for a correlation client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identity this client sends from
    pub identity: TargetIdentity,
    /// Well-known directory target answering inventory queries
    pub directory_target: TargetIdentity,
    /// Default deadline for a request/response cycle
    pub request_timeout: Duration,
    /// Deadline for each individual status query
    pub status_query_timeout: Duration,
    /// Deadline for each individual inventory query
    pub inventory_query_timeout: Duration,
    /// Default sleep between status poll attempts
    pub poll_interval: Duration,
    /// Default status poll retry budget
    pub poll_max_retries: u32,
}

impl ClientConfig {
    /// Default client identity
    pub const DEFAULT_IDENTITY: &'static str = "client://localhost/muster";

    /// Default directory target
    pub const DEFAULT_DIRECTORY_TARGET: &'static str = "broker://localhost/directory";

    /// Create a builder for constructing a ClientConfig
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Core(muster_core::Error::validation(
                "Request timeout must be greater than zero",
            )));
        }
        if self.status_query_timeout.is_zero() || self.inventory_query_timeout.is_zero() {
            return Err(Error::Core(muster_core::Error::validation(
                "Query timeouts must be greater than zero",
            )));
        }
        if self.poll_max_retries == 0 {
            return Err(Error::Core(muster_core::Error::validation(
                "Poll retry budget must be at least one attempt",
            )));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: TargetIdentity::new(Self::DEFAULT_IDENTITY)
                .expect("default identity is valid"),
            directory_target: TargetIdentity::new(Self::DEFAULT_DIRECTORY_TARGET)
                .expect("default directory target is valid"),
            request_timeout: Duration::from_secs(30),
            status_query_timeout: Duration::from_secs(10),
            inventory_query_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            poll_max_retries: 30,
        }
    }
}

/// Builder for constructing ClientConfig instances with validation
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new config builder with defaults
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the client identity
    pub fn identity(mut self, identity: TargetIdentity) -> Self {
        self.config.identity = identity;
        self
    }

    /// Set the directory target
    pub fn directory_target(mut self, target: TargetIdentity) -> Self {
        self.config.directory_target = target;
        self
    }

    /// Set the default request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the per-status-query timeout
    pub fn status_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.status_query_timeout = timeout;
        self
    }

    /// Set the per-inventory-query timeout
    pub fn inventory_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.inventory_query_timeout = timeout;
        self
    }

    /// Set the default status poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the default status poll retry budget
    pub fn poll_max_retries(mut self, retries: u32) -> Self {
        self.config.poll_max_retries = retries;
        self
    }

    /// Build the ClientConfig instance
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
