mod file_config;

pub use file_config::{ElectionConfig, FileConfig, SchedulerConfig};

use crate::election::LeaseElectorConfig;
use crate::runtime_info;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_LEASE_NAME: &str = "cluster-leader";
pub const DEFAULT_LEASE_TTL_SECS: u64 = 15;
pub const DEFAULT_LEASE_RENEW_SECS: u64 = 5;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RUNTIME_INFO_SYNC_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ElectionBackend {
    /// Every node leads itself.
    #[default]
    Solo,
    /// Lease in a SQLite file shared by the nodes.
    Lease,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub node_id: Option<String>,
    pub port: u16,
    pub metrics_port: u16,
    pub election: ElectionBackend,
    pub lease_db: Option<PathBuf>,
    pub lease_name: String,
    pub lease_ttl_secs: u64,
    pub lease_renew_secs: u64,
    pub worker_threads: usize,
    pub runtime_info_path: Option<PathBuf>,
    pub shutdown_grace_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            election: ElectionBackend::Solo,
            lease_db: None,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            lease_renew_secs: DEFAULT_LEASE_RENEW_SECS,
            worker_threads: DEFAULT_WORKER_THREADS,
            runtime_info_path: None,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub node_id: String,
    pub port: u16,
    pub metrics_port: u16,
    pub runtime_info_path: PathBuf,

    // Feature configs (with defaults)
    pub election: ElectionSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct ElectionSettings {
    pub backend: ElectionBackend,
    /// Required for the lease backend.
    pub lease_db: Option<PathBuf>,
    pub lease_name: String,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub worker_threads: usize,
    pub shutdown_grace: Duration,
    pub heartbeat_interval: Duration,
    pub runtime_info_sync_interval: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let node_id = file
            .node_id
            .or_else(|| cli.node_id.clone())
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let runtime_info_path = file
            .runtime_info_path
            .map(PathBuf::from)
            .or_else(|| cli.runtime_info_path.clone())
            .unwrap_or_else(|| std::env::temp_dir().join(runtime_info::DEFAULT_FILE_NAME));

        // Election settings - [election] section overrides CLI
        let election_file = file.election.unwrap_or_default();
        let backend = match election_file.backend {
            Some(name) => match parse_election_backend(&name) {
                Some(backend) => backend,
                None => bail!("Unknown election backend '{}' (expected solo or lease)", name),
            },
            None => cli.election,
        };
        let lease_db = election_file
            .lease_db
            .map(PathBuf::from)
            .or_else(|| cli.lease_db.clone());
        let lease_name = election_file
            .lease_name
            .unwrap_or_else(|| cli.lease_name.clone());
        let lease_ttl_secs = election_file.lease_ttl_secs.unwrap_or(cli.lease_ttl_secs);
        let lease_renew_secs = election_file
            .lease_renew_secs
            .unwrap_or(cli.lease_renew_secs);

        if backend == ElectionBackend::Lease && lease_db.is_none() {
            bail!("The lease election backend requires --lease-db or election.lease_db");
        }
        if lease_renew_secs == 0 {
            bail!("Lease renew interval must be at least 1 second");
        }
        if lease_ttl_secs <= lease_renew_secs {
            bail!(
                "Lease TTL ({}s) must be greater than the renew interval ({}s)",
                lease_ttl_secs,
                lease_renew_secs
            );
        }
        if lease_name.trim().is_empty() {
            bail!("Lease name must not be empty");
        }

        // Scheduler settings - [scheduler] section overrides CLI
        let scheduler_file = file.scheduler.unwrap_or_default();
        let worker_threads = scheduler_file
            .worker_threads
            .unwrap_or(cli.worker_threads);
        if worker_threads == 0 {
            bail!("worker_threads must be at least 1");
        }
        let shutdown_grace_secs = scheduler_file
            .shutdown_grace_secs
            .unwrap_or(cli.shutdown_grace_secs);
        let heartbeat_interval_secs = scheduler_file
            .heartbeat_interval_secs
            .unwrap_or(cli.heartbeat_interval_secs);
        if heartbeat_interval_secs == 0 {
            bail!("Heartbeat interval must be at least 1 second");
        }
        let runtime_info_sync_secs = scheduler_file
            .runtime_info_sync_secs
            .unwrap_or(DEFAULT_RUNTIME_INFO_SYNC_SECS)
            .max(1);

        Ok(Self {
            node_id,
            port,
            metrics_port,
            runtime_info_path,
            election: ElectionSettings {
                backend,
                lease_db,
                lease_name,
                lease_ttl: Duration::from_secs(lease_ttl_secs),
                lease_renew_interval: Duration::from_secs(lease_renew_secs),
            },
            scheduler: SchedulerSettings {
                worker_threads,
                shutdown_grace: Duration::from_secs(shutdown_grace_secs),
                heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
                runtime_info_sync_interval: Duration::from_secs(runtime_info_sync_secs),
            },
        })
    }

    pub fn lease_elector_config(&self) -> LeaseElectorConfig {
        LeaseElectorConfig {
            lease_name: self.election.lease_name.clone(),
            ttl: self.election.lease_ttl,
            renew_interval: self.election.lease_renew_interval,
        }
    }
}

/// Parses an election backend name.
/// Uses clap's ValueEnum trait for parsing.
fn parse_election_backend(s: &str) -> Option<ElectionBackend> {
    ElectionBackend::from_str(s, true).ok()
}
