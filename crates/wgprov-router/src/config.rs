//! Router Connection Settings
//!
//! Immutable configuration for the RouterOS REST endpoint: address,
//! credentials, TLS mode, target WireGuard interface and the retry
//! policy applied to every call.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// RouterOS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Router hostname or address
    #[serde(default = "default_host")]
    pub host: String,
    /// REST API port
    #[serde(default = "default_port")]
    pub port: u16,
    /// API account user
    #[serde(default = "default_username")]
    pub username: String,
    /// API account password
    #[serde(default)]
    pub password: String,
    /// Connect over HTTPS
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// WireGuard interface peers are managed on
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Per-attempt timeout (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Attempts per operation
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Linear backoff base (seconds)
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
    /// Compute reconciliation decisions without mutating the router
    #[serde(default)]
    pub dry_run: bool,
}

fn default_host() -> String {
    "192.168.88.1".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_username() -> String {
    "api_user".to_string()
}

fn default_use_tls() -> bool {
    true
}

fn default_interface() -> String {
    "wireguard1".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_seconds() -> u64 {
    2
}

impl RouterConfig {
    /// Retry policy derived from the configured values
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.timeout_seconds),
            Duration::from_secs(self.retry_backoff_seconds),
        )
    }

    /// Base URL of the REST API
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            use_tls: default_use_tls(),
            interface: default_interface(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            dry_run: false,
        }
    }
}
