//! Service Settings
//!
//! One immutable settings tree for the whole process, loaded from a
//! TOML file at startup and passed by reference into each component's
//! constructor. No global mutable configuration state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wgprov_profiles::WgConfig;
use wgprov_router::RouterConfig;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite database location
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// tracing filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// WireGuard server settings
    pub wg: WgConfig,
    /// Router connection settings
    #[serde(default)]
    pub router: RouterConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("wgprov.db")
}

fn default_log_filter() -> String {
    "wgprov=info".to_string()
}

impl Settings {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        toml::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))
    }
}

/// Settings loading errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_settings() {
        let settings = Settings::from_toml(
            r#"
            [wg]
            server_public_key = "WDvCRKv9hVAx1P3L7dKxiNxI3CxbK9Ue1tL8x2ZqRVk="
            "#,
        )
        .unwrap();

        assert_eq!(settings.database_path, PathBuf::from("wgprov.db"));
        assert_eq!(settings.router.interface, "wireguard1");
        assert_eq!(settings.wg.network_cidr.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_full_settings() {
        let settings = Settings::from_toml(
            r#"
            database_path = "/var/lib/wgprov/profiles.db"
            log_filter = "wgprov=debug"

            [wg]
            server_public_key = "WDvCRKv9hVAx1P3L7dKxiNxI3CxbK9Ue1tL8x2ZqRVk="
            endpoint_host = "vpn.test.local"
            network_cidr = "10.8.0.0/22"

            [wg.obfuscation]
            junk_packet_count = 7

            [router]
            host = "10.1.1.1"
            port = 8443
            username = "svc"
            password = "secret"
            retry_attempts = 5
            dry_run = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.wg.network_cidr.to_string(), "10.8.0.0/22");
        assert_eq!(settings.wg.obfuscation.junk_packet_count, 7);
        assert_eq!(settings.router.retry_attempts, 5);
        assert!(settings.router.dry_run);
        assert_eq!(settings.router.base_url(), "https://10.1.1.1:8443");
    }

    #[test]
    fn test_missing_wg_section_rejected() {
        assert!(Settings::from_toml("database_path = \"x.db\"").is_err());
    }
}
