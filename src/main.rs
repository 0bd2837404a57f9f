use anyhow::{Context, Result};
use clap::Parser;
use cluster_scheduler::config::{AppConfig, CliConfig, ElectionBackend, FileConfig};
use cluster_scheduler::service::ServiceContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().with_context(|| format!("Error resolving path: {}", s))?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(version, about = "Scheduled-task coordination node")]
struct CliArgs {
    /// Path to a TOML config file. Its values override command line flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = cluster_scheduler::config::DEFAULT_PORT)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Identifier of this node in the cluster. A random one is generated if absent.
    #[clap(long)]
    pub node_id: Option<String>,

    /// Leader election backend.
    #[clap(long, value_enum, default_value_t = ElectionBackend::Solo)]
    pub election: ElectionBackend,

    /// SQLite file holding the leader lease. Required by the lease backend.
    #[clap(long, value_parser = parse_path)]
    pub lease_db: Option<PathBuf>,

    /// Name of the lease the nodes compete for.
    #[clap(long, default_value = cluster_scheduler::config::DEFAULT_LEASE_NAME)]
    pub lease_name: String,

    /// Seconds a lease stays valid without renewal.
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_LEASE_TTL_SECS)]
    pub lease_ttl_secs: u64,

    /// Seconds between lease renewals.
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_LEASE_RENEW_SECS)]
    pub lease_renew_secs: u64,

    /// Maximum number of task executions running at once.
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,

    /// Where to write the runtime info file. Defaults to the temp directory.
    #[clap(long, value_parser = parse_path)]
    pub runtime_info_path: Option<PathBuf>,

    /// Seconds to wait for running tasks on shutdown.
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,

    /// Seconds between leader heartbeats.
    #[clap(long, default_value_t = cluster_scheduler::config::DEFAULT_HEARTBEAT_INTERVAL_SECS)]
    pub heartbeat_interval_secs: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            node_id: self.node_id.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            election: self.election,
            lease_db: self.lease_db.clone(),
            lease_name: self.lease_name.clone(),
            lease_ttl_secs: self.lease_ttl_secs,
            lease_renew_secs: self.lease_renew_secs,
            worker_threads: self.worker_threads,
            runtime_info_path: self.runtime_info_path.clone(),
            shutdown_grace_secs: self.shutdown_grace_secs,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!(
        "Starting cluster-scheduler {}-{} as node {} ({:?} election, {} workers)",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        config.node_id,
        config.election.backend,
        config.scheduler.worker_threads
    );

    let context = Arc::new(ServiceContext::new(config));
    let service = Arc::clone(&context).start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    service.shutdown().await
}
