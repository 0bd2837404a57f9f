//! Top-level service wiring.
//!
//! A [`ServiceContext`] owns everything that exists once per running
//! service, the schedule manager slot included, and is handed to whoever
//! needs it instead of living in globals.

use crate::config::{AppConfig, ElectionBackend};
use crate::election::{LeaderElector, LeaseElector, SoloElector, SqliteLeaseStore};
use crate::runtime_info::RuntimeInfoStore;
use crate::schedule::tasks::{LeaderHeartbeatTask, RuntimeInfoSyncTask};
use crate::schedule::{
    CoordinationDriver, ElectionDriver, ManagerSlot, ScheduleError, ScheduleManager,
};
use crate::server::{make_app, make_metrics_app, metrics, ServerState, WebServer};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub fn build_elector(config: &AppConfig) -> Result<Arc<dyn LeaderElector>> {
    match config.election.backend {
        ElectionBackend::Solo => {
            info!("Using solo election: node {} leads itself", config.node_id);
            Ok(Arc::new(SoloElector::new(config.node_id.clone())))
        }
        ElectionBackend::Lease => {
            let db_path = config
                .election
                .lease_db
                .as_ref()
                .context("Lease election requires a lease database path")?;
            info!("Opening lease database at {:?}...", db_path);
            let store = SqliteLeaseStore::new(db_path)?;
            Ok(Arc::new(LeaseElector::new(
                config.node_id.clone(),
                Arc::new(store),
                config.lease_elector_config(),
            )))
        }
    }
}

pub struct ServiceContext {
    pub config: AppConfig,
    pub schedule: ManagerSlot,
    pub runtime_info: Arc<RuntimeInfoStore>,
}

impl ServiceContext {
    pub fn new(config: AppConfig) -> Self {
        let runtime_info = Arc::new(RuntimeInfoStore::new(config.runtime_info_path.clone()));
        Self {
            config,
            schedule: ManagerSlot::new(),
            runtime_info,
        }
    }

    /// The service's schedule manager, once `start` created it.
    pub fn schedule_manager(&self) -> Result<Arc<ScheduleManager>, ScheduleError> {
        self.schedule.get()
    }

    /// The slot's manager, creating it with the built-in tasks on first use.
    ///
    /// Built-in tasks go onto the driver before it enters the slot, so a
    /// retried start reuses the manager without registering them twice.
    fn init_manager(&self) -> Result<Arc<ScheduleManager>> {
        if let Ok(manager) = self.schedule.get() {
            return Ok(manager);
        }

        let elector = build_elector(&self.config)?;
        let driver = ElectionDriver::new(elector, self.config.scheduler.worker_threads)
            .with_shutdown_grace(self.config.scheduler.shutdown_grace);
        driver.set_scheduled_task(Arc::new(RuntimeInfoSyncTask::new(
            Arc::clone(&self.runtime_info),
            self.config.scheduler.runtime_info_sync_interval,
        )))?;
        driver.set_scheduled_leader_task(Arc::new(LeaderHeartbeatTask::new(
            self.config.scheduler.heartbeat_interval,
        )))?;
        Ok(self.schedule.get_or_init(Arc::new(driver)))
    }

    fn discard_runtime_info(&self) {
        if let Err(e) = self.runtime_info.remove_file() {
            warn!("Failed to remove runtime info file: {}", e);
        }
    }

    /// Create the schedule manager, bring up the web and metrics servers
    /// and start scheduling.
    ///
    /// A failed start stops whatever it brought up and may be retried on
    /// the same context.
    pub async fn start(self: Arc<Self>) -> Result<RunningService> {
        metrics::init_metrics();

        let manager = self.init_manager()?;

        let web_server = WebServer::new("Main", make_app(ServerState::new(Arc::clone(&manager))));
        let local_addr = web_server.start(self.config.port).await?;

        self.runtime_info.set_service_port(local_addr.port());
        if let Err(e) = self.runtime_info.synchronize() {
            warn!("Failed to write runtime info: {}", e);
        }

        let metrics_server = WebServer::new("Metrics", make_metrics_app());
        let metrics_addr = match metrics_server.start(self.config.metrics_port).await {
            Ok(addr) => addr,
            Err(e) => {
                let _ = web_server.stop().await;
                self.discard_runtime_info();
                return Err(e);
            }
        };

        if let Err(e) = manager.start().await {
            let _ = web_server.stop().await;
            let _ = metrics_server.stop().await;
            self.discard_runtime_info();
            return Err(e).context("Failed to start schedule manager");
        }

        info!(
            "Node {} ready at {} (metrics at {})",
            self.config.node_id, local_addr, metrics_addr
        );
        Ok(RunningService {
            context: self,
            manager,
            web_server,
            metrics_server,
            local_addr,
            metrics_addr,
        })
    }
}

pub struct RunningService {
    context: Arc<ServiceContext>,
    manager: Arc<ScheduleManager>,
    web_server: WebServer,
    metrics_server: WebServer,
    local_addr: SocketAddr,
    metrics_addr: SocketAddr,
}

impl RunningService {
    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn manager(&self) -> &Arc<ScheduleManager> {
        &self.manager
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Stop serving, stop scheduling and remove the runtime info file.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down node {}...", self.context.config.node_id);
        self.web_server.stop().await?;
        self.metrics_server.stop().await?;
        self.manager.stop().await?;

        self.context.discard_runtime_info();
        info!("Shutdown complete");
        Ok(())
    }
}
