use super::handle::ScheduleStatus;
use super::task::ScheduledTask;
use crate::election::ElectionError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by a coordination driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Coordination service error: {0}")]
    Coordination(#[from] ElectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Driver is already started")]
    AlreadyStarted,

    #[error("Driver has been stopped")]
    Stopped,

    #[error("A task with id '{0}' is already registered")]
    DuplicateTask(String),

    #[error("No async runtime available to drive tasks")]
    NoRuntime,
}

/// Cluster membership, leader election and the scheduling clock.
///
/// A driver decides where and when registered tasks fire: node-local tasks
/// fire on every node independent of leadership, leader tasks only while
/// the local node holds leadership, re-armed from their delay every time
/// leadership is acquired.
#[async_trait]
pub trait CoordinationDriver: Send + Sync {
    /// Join leader election and start firing node-local tasks.
    ///
    /// On error the driver stays in its non-started state, so starting
    /// again is meaningful.
    async fn start_driver(&self) -> Result<(), DriverError>;

    /// Leave the election, release leadership and stop the clock.
    ///
    /// In-flight executions may finish but nothing fires afterwards. Safe to
    /// call when the node never became leader.
    async fn stop_driver(&self) -> Result<(), DriverError>;

    /// Record a node-local task. Does not block on task execution.
    fn set_scheduled_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), DriverError>;

    /// Record a leader task. Does not block on task execution.
    fn set_scheduled_leader_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), DriverError>;

    /// Local, possibly stale, view of leadership.
    fn is_leader(&self) -> bool;

    fn status(&self) -> ScheduleStatus;
}
