use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "MCM_VSPHERE_PLUGIN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "plugin.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    pub mqtt: MqttConf,
    pub topics: TopicsConf,
    pub provider: ProviderConf,
    pub simulator: SimulatorConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "mcm-vsphere-plugin".into(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TopicsConf {
    pub command: String,
    pub response: String,
}

impl Default for TopicsConf {
    fn default() -> Self {
        Self {
            command: "mcm/vsphere/command@v1".into(),
            response: "mcm/vsphere/response@v1".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConf {
    /// Deadline of a single lifecycle command; 0 disables it.
    pub operation_timeout_secs: u64,
}

impl Default for ProviderConf {
    fn default() -> Self {
        Self { operation_timeout_secs: 300 }
    }
}

/// Inventory served by the built-in simulator backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SimulatorConf {
    pub datacenter: String,
    pub templates: Vec<String>,
    /// When set, only these credentials open a session.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SimulatorConf {
    fn default() -> Self {
        Self {
            datacenter: "dc1".into(),
            templates: Vec::new(),
            username: None,
            password: None,
        }
    }
}

pub fn parse_config(txt: &str) -> Result<PluginConfig> {
    if txt.trim().is_empty() {
        return Ok(PluginConfig::default());
    }
    serde_yaml::from_str(txt).context("invalid plugin config")
}

pub async fn load_config_from(path: &Path) -> Result<PluginConfig> {
    if !path.exists() {
        warn!("no {}, using default config", path.display());
        return Ok(PluginConfig::default());
    }
    let txt = fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let cfg = parse_config(&txt).with_context(|| format!("in {}", path.display()))?;
    info!("loaded config from {}", path.display());
    Ok(cfg)
}

pub async fn load_config() -> Result<PluginConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_config_from(Path::new(&path)).await
}
