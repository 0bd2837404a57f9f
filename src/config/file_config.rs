use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub node_id: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub runtime_info_path: Option<String>,

    // Feature configs
    pub election: Option<ElectionConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ElectionConfig {
    /// Election backend: "solo" or "lease"
    pub backend: Option<String>,
    pub lease_db: Option<String>,
    pub lease_name: Option<String>,
    pub lease_ttl_secs: Option<u64>,
    pub lease_renew_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub worker_threads: Option<usize>,
    pub shutdown_grace_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub runtime_info_sync_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
