//! Configuration for the KVD client
//!
//! Centralized configuration with the protocol's customary defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{KvdError, Result};

/// Default KVD service port
pub const DEFAULT_PORT: u16 = 1080;

/// Default initial timeout for create/update/delete/checksig (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Default initial timeout for get (milliseconds)
pub const DEFAULT_GET_TIMEOUT_MS: u64 = 50;

/// Default number of transmissions per request
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Upper bound for the doubled retry timeout (milliseconds)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2000;

/// Main configuration for a KVD client instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Remote Service
    // -------------------------------------------------------------------------
    /// Host name or IP address of the KVD service (required)
    pub remote_address: String,

    /// UDP port of the KVD service
    pub remote_port: u16,

    // -------------------------------------------------------------------------
    // Retry Configuration
    // -------------------------------------------------------------------------
    /// Initial timeout for create/update/delete/checksig (milliseconds)
    pub default_timeout_ms: u64,

    /// Initial timeout for get (milliseconds)
    pub get_timeout_ms: u64,

    /// Transmissions per request before giving up
    pub max_retries: u32,

    /// Cap for the doubled timeout (milliseconds)
    pub max_backoff_ms: u64,

    // -------------------------------------------------------------------------
    // Socket Configuration
    // -------------------------------------------------------------------------
    /// Local address the datagram socket binds to
    pub bind_address: String,

    /// How often the receive thread wakes to check for shutdown (milliseconds)
    pub recv_poll_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_address: String::new(),
            remote_port: DEFAULT_PORT,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            get_timeout_ms: DEFAULT_GET_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            bind_address: "0.0.0.0:0".to_string(),
            recv_poll_ms: 100,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a config from a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| KvdError::Config(format!("invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the multiplexer relies on
    pub fn validate(&self) -> Result<()> {
        if self.remote_address.trim().is_empty() {
            return Err(KvdError::Config("remote_address is required".to_string()));
        }
        if self.max_retries == 0 {
            return Err(KvdError::Config("max_retries must be at least 1".to_string()));
        }
        if self.default_timeout_ms == 0 || self.get_timeout_ms == 0 {
            return Err(KvdError::Config("timeouts must be non-zero".to_string()));
        }
        if self.max_backoff_ms < self.default_timeout_ms.max(self.get_timeout_ms) {
            return Err(KvdError::Config(format!(
                "max_backoff_ms ({}) is below an initial timeout",
                self.max_backoff_ms
            )));
        }
        if self.recv_poll_ms == 0 {
            return Err(KvdError::Config("recv_poll_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Retry parameters consumed by the multiplexer
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            get_timeout: Duration::from_millis(self.get_timeout_ms),
            max_retries: self.max_retries,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Per-request retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub default_timeout: Duration,
    pub get_timeout: Duration,
    pub max_retries: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ClientConfig::default().retry_policy()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ConfigBuilder {
    config: ClientConfig,
}

impl ConfigBuilder {
    /// Set the remote host name or IP address
    pub fn remote_address(mut self, addr: impl Into<String>) -> Self {
        self.config.remote_address = addr.into();
        self
    }

    /// Set the remote UDP port
    pub fn remote_port(mut self, port: u16) -> Self {
        self.config.remote_port = port;
        self
    }

    /// Set the initial timeout for non-get requests (in milliseconds)
    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    /// Set the initial timeout for get requests (in milliseconds)
    pub fn get_timeout_ms(mut self, ms: u64) -> Self {
        self.config.get_timeout_ms = ms;
        self
    }

    /// Set the number of transmissions per request
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the backoff cap (in milliseconds)
    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    /// Set the local bind address
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set the receive-thread poll interval (in milliseconds)
    pub fn recv_poll_ms(mut self, ms: u64) -> Self {
        self.config.recv_poll_ms = ms;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
