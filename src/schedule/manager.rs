use super::driver::{CoordinationDriver, DriverError};
use super::handle::ScheduleStatus;
use super::task::ScheduledTask;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// No manager exists yet. Retry once the owning service finished start-up.
    #[error("Schedule manager not started")]
    NotStarted,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Schedule manager is already started")]
    AlreadyStarted,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    NotStarted,
    Started,
    Stopped,
}

/// Entry point subsystems use to register background work.
///
/// Wraps exactly one coordination driver and forwards to it, so callers
/// never depend on the driver's concrete type.
pub struct ScheduleManager {
    driver: Arc<dyn CoordinationDriver>,
    lifecycle: Mutex<Lifecycle>,
    /// Mirrors `lifecycle == Started` for lock-free reads.
    started: AtomicBool,
}

impl ScheduleManager {
    pub fn new(driver: Arc<dyn CoordinationDriver>) -> Self {
        Self {
            driver,
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            started: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CoordinationDriver> {
        &self.driver
    }

    /// Start the driver. A failed start leaves the manager not started.
    pub async fn start(&self) -> Result<(), ScheduleError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Started => return Err(ScheduleError::AlreadyStarted),
            Lifecycle::Stopped => return Err(DriverError::Stopped.into()),
            Lifecycle::NotStarted => {}
        }

        self.driver.start_driver().await?;
        *lifecycle = Lifecycle::Started;
        self.started.store(true, Ordering::SeqCst);
        info!("Schedule manager started");
        Ok(())
    }

    /// Stop the driver. Nothing fires afterwards; in-flight executions may
    /// finish. No-op when not started.
    pub async fn stop(&self) -> Result<(), ScheduleError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle != Lifecycle::Started {
            debug!("Schedule manager stop ignored ({:?})", *lifecycle);
            return Ok(());
        }

        *lifecycle = Lifecycle::Stopped;
        self.started.store(false, Ordering::SeqCst);
        self.driver.stop_driver().await?;
        info!("Schedule manager stopped");
        Ok(())
    }

    /// True between a successful `start` and the following `stop`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a task that runs on every node.
    pub fn register_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), ScheduleError> {
        Ok(self.driver.set_scheduled_task(task)?)
    }

    /// Register a task that runs only on the elected leader.
    pub fn register_leader_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), ScheduleError> {
        Ok(self.driver.set_scheduled_leader_task(task)?)
    }

    pub fn is_leader(&self) -> bool {
        self.driver.is_leader()
    }

    pub fn status(&self) -> ScheduleStatus {
        self.driver.status()
    }
}

/// Holds the one schedule manager of a running service.
///
/// Owned by the service context and passed to whoever needs it. The first
/// initialisation wins; drivers offered afterwards are dropped.
#[derive(Default)]
pub struct ManagerSlot {
    cell: OnceLock<Arc<ScheduleManager>>,
}

impl ManagerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, driver: Arc<dyn CoordinationDriver>) -> Arc<ScheduleManager> {
        Arc::clone(
            self.cell
                .get_or_init(|| Arc::new(ScheduleManager::new(driver))),
        )
    }

    /// Like `get_or_init`, for callers whose driver may be missing.
    pub fn try_init(
        &self,
        driver: Option<Arc<dyn CoordinationDriver>>,
    ) -> Result<Arc<ScheduleManager>, ScheduleError> {
        let driver = driver.ok_or_else(|| {
            ScheduleError::InvalidArgument("schedule manager requires a driver".to_string())
        })?;
        Ok(self.get_or_init(driver))
    }

    pub fn get(&self) -> Result<Arc<ScheduleManager>, ScheduleError> {
        self.cell.get().cloned().ok_or(ScheduleError::NotStarted)
    }
}
