//! Test service lifecycle management
//!
//! Spawns the full service wiring on ephemeral ports with its files in a
//! temporary directory.

use cluster_scheduler::config::{AppConfig, CliConfig};
use cluster_scheduler::service::{RunningService, ServiceContext};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestService {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub metrics_url: String,
    pub runtime_info_path: PathBuf,
    pub service: Option<RunningService>,

    _temp_dir: TempDir,
}

/// Solo-election settings on ephemeral ports with fast built-in tasks.
pub fn test_cli_config(node_id: &str, runtime_info_path: PathBuf) -> CliConfig {
    CliConfig {
        node_id: Some(node_id.to_string()),
        port: 0,
        metrics_port: 0,
        runtime_info_path: Some(runtime_info_path),
        shutdown_grace_secs: 2,
        heartbeat_interval_secs: 1,
        ..Default::default()
    }
}

impl TestService {
    pub async fn spawn(node_id: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let runtime_info_path = temp_dir.path().join("runtime.json");

        let cli = test_cli_config(node_id, runtime_info_path.clone());
        let config = AppConfig::resolve(&cli, None).expect("Failed to resolve config");

        let service = Arc::new(ServiceContext::new(config))
            .start()
            .await
            .expect("Failed to start service");

        Self {
            base_url: format!("http://{}", service.local_addr()),
            metrics_url: format!("http://{}/metrics", service.metrics_addr()),
            runtime_info_path,
            service: Some(service),
            _temp_dir: temp_dir,
        }
    }

    pub fn service(&self) -> &RunningService {
        self.service.as_ref().expect("Service already shut down")
    }

    pub async fn shutdown(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown().await.expect("Failed to shut down service");
        }
    }
}
