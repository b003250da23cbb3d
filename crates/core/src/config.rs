use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// Address literals consumed at the routing boundary. All matches are
/// exact or prefix, case-sensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressConfig {
    #[serde(default = "default_self_id")]
    pub self_id: String,
    #[serde(default = "default_tab_prefix")]
    pub tab_prefix: String,
    #[serde(default = "default_host_id")]
    pub host_id: String,
    #[serde(default = "default_host_prefix")]
    pub host_prefix: String,
}

fn default_self_id() -> String {
    "tabwire/coordinator".to_string()
}

fn default_tab_prefix() -> String {
    "tab/".to_string()
}

fn default_host_id() -> String {
    "com.tabwire.host".to_string()
}

fn default_host_prefix() -> String {
    "Protocols/".to_string()
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            self_id: default_self_id(),
            tab_prefix: default_tab_prefix(),
            host_id: default_host_id(),
            host_prefix: default_host_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    /// Pause between idle keep-alive rounds on the native channel. An
    /// override preempts the pause immediately.
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    /// Default deadline for `send_request` callers.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on waiting for a created tab's load-complete signal.
    #[serde(default = "default_tab_load_timeout_ms")]
    pub tab_load_timeout_ms: u64,
    /// When true, a message addressed to an unregistered tab name opens
    /// that tab before delivery instead of being dropped.
    #[serde(default = "default_auto_open_tabs")]
    pub auto_open_tabs: bool,
    /// URL used for lazily provisioned tabs; `{name}` expands to the
    /// receiver address.
    #[serde(default = "default_tab_url_template")]
    pub tab_url_template: String,
}

fn default_keep_alive_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_tab_load_timeout_ms() -> u64 {
    30_000
}

fn default_auto_open_tabs() -> bool {
    true
}

fn default_tab_url_template() -> String {
    "{name}".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            tab_load_timeout_ms: default_tab_load_timeout_ms(),
            auto_open_tabs: default_auto_open_tabs(),
            tab_url_template: default_tab_url_template(),
        }
    }
}

/// How to launch the external native process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8917
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub addresses: AddressConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.addresses.tab_prefix, "tab/");
        assert_eq!(config.addresses.self_id, "tabwire/coordinator");
        assert!(config.bus.auto_open_tabs);
        assert_eq!(config.bus.keep_alive_interval_ms, 1000);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"bus": {"autoOpenTabs": false}}"#).unwrap();
        assert!(!config.bus.auto_open_tabs);
        assert_eq!(config.bus.request_timeout_ms, 30_000);
        assert_eq!(config.addresses.host_prefix, "Protocols/");
    }
}
