//! WireGuard Server Settings
//!
//! Immutable configuration describing the server side of issued client
//! profiles: endpoint, DNS, address pool and AmneziaWG obfuscation
//! parameters. Assembled once at startup and passed by reference into
//! the components that need it.

use crate::pool::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// AmneziaWG obfuscation parameters.
///
/// Passed through verbatim into rendered client configs; semantic
/// ranges are not validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationConfig {
    /// Number of junk packets sent before the handshake
    #[serde(default = "default_junk_packet_count")]
    pub junk_packet_count: u32,
    /// Minimum junk packet size (bytes)
    #[serde(default = "default_junk_packet_min_size")]
    pub junk_packet_min_size: u32,
    /// Maximum junk packet size (bytes)
    #[serde(default = "default_junk_packet_max_size")]
    pub junk_packet_max_size: u32,
    /// Junk prepended to the init handshake packet
    #[serde(default = "default_init_packet_junk_size")]
    pub init_packet_junk_size: u32,
    /// Junk prepended to the response handshake packet
    #[serde(default = "default_response_packet_junk_size")]
    pub response_packet_junk_size: u32,
    /// Junk prepended to the underload packet
    #[serde(default = "default_underload_packet_junk_size")]
    pub underload_packet_junk_size: u32,
    /// Transport packet magic header
    #[serde(default = "default_transport_packet_magic")]
    pub transport_packet_magic: u32,
}

fn default_junk_packet_count() -> u32 {
    5
}

fn default_junk_packet_min_size() -> u32 {
    90
}

fn default_junk_packet_max_size() -> u32 {
    220
}

fn default_init_packet_junk_size() -> u32 {
    40
}

fn default_response_packet_junk_size() -> u32 {
    120
}

fn default_underload_packet_junk_size() -> u32 {
    80
}

fn default_transport_packet_magic() -> u32 {
    666
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            junk_packet_count: default_junk_packet_count(),
            junk_packet_min_size: default_junk_packet_min_size(),
            junk_packet_max_size: default_junk_packet_max_size(),
            init_packet_junk_size: default_init_packet_junk_size(),
            response_packet_junk_size: default_response_packet_junk_size(),
            underload_packet_junk_size: default_underload_packet_junk_size(),
            transport_packet_magic: default_transport_packet_magic(),
        }
    }
}

/// Server-side settings for issued client profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgConfig {
    /// Server public key (base64)
    pub server_public_key: String,
    /// Endpoint hostname clients connect to
    #[serde(default = "default_endpoint_host")]
    pub endpoint_host: String,
    /// Endpoint UDP port
    #[serde(default = "default_endpoint_port")]
    pub endpoint_port: u16,
    /// DNS servers pushed to clients
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<Ipv4Addr>,
    /// Address pool clients are allocated from
    #[serde(default = "default_network_cidr")]
    pub network_cidr: Ipv4Cidr,
    /// Ranges routed through the tunnel
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,
    /// Keepalive interval (seconds)
    #[serde(default = "default_persistent_keepalive")]
    pub persistent_keepalive: u16,
    /// AmneziaWG obfuscation parameters
    #[serde(default)]
    pub obfuscation: ObfuscationConfig,
}

fn default_endpoint_host() -> String {
    "vpn.example.com".to_string()
}

fn default_endpoint_port() -> u16 {
    51820
}

fn default_dns_servers() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)]
}

fn default_network_cidr() -> Ipv4Cidr {
    "10.0.0.0/24".parse().expect("static CIDR")
}

fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

fn default_persistent_keepalive() -> u16 {
    25
}

impl WgConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// DNS servers rendered as a comma-separated list
    pub fn dns_list(&self) -> String {
        self.dns_servers
            .iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Allowed-IP ranges rendered as a comma-separated list
    pub fn allowed_ips_list(&self) -> String {
        self.allowed_ips.join(",")
    }
}

impl Default for WgConfig {
    fn default() -> Self {
        Self {
            server_public_key: String::new(),
            endpoint_host: default_endpoint_host(),
            endpoint_port: default_endpoint_port(),
            dns_servers: default_dns_servers(),
            network_cidr: default_network_cidr(),
            allowed_ips: default_allowed_ips(),
            persistent_keepalive: default_persistent_keepalive(),
            obfuscation: ObfuscationConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WgConfig::default();

        assert_eq!(config.endpoint_port, 51820);
        assert_eq!(config.persistent_keepalive, 25);
        assert_eq!(config.obfuscation.transport_packet_magic, 666);
        assert_eq!(config.dns_list(), "1.1.1.1,1.0.0.1");
        assert_eq!(config.allowed_ips_list(), "0.0.0.0/0,::/0");
    }

    #[test]
    fn test_from_toml_minimal() {
        let config = WgConfig::from_toml(
            r#"
            server_public_key = "WDvCRKv9hVAx1P3L7dKxiNxI3CxbK9Ue1tL8x2ZqRVk="
            endpoint_host = "vpn.test.local"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint_host, "vpn.test.local");
        assert_eq!(config.network_cidr.to_string(), "10.0.0.0/24");
        assert_eq!(config.obfuscation.junk_packet_count, 5);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(WgConfig::from_toml("network_cidr = \"oops\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = WgConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = WgConfig::from_toml(&text).unwrap();

        assert_eq!(parsed.network_cidr, config.network_cidr);
        assert_eq!(parsed.dns_servers, config.dns_servers);
    }
}
