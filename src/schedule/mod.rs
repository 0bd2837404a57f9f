//! Scheduled-task coordination.
//!
//! Subsystems register work with a [`ScheduleManager`] either as node-local
//! tasks, which fire on every node, or as leader tasks, which fire only on
//! the node currently holding cluster leadership. A [`CoordinationDriver`]
//! decides where and when registered tasks fire.

mod clock;
mod context;
mod driver;
mod election_driver;
mod handle;
mod manager;
mod retry;
mod task;
pub mod tasks;

pub(crate) use clock::lock;
pub use clock::{TaskClock, TaskEntry, TaskStats};
pub use context::TaskContext;
pub use driver::{CoordinationDriver, DriverError};
pub use election_driver::{ElectionDriver, DEFAULT_SHUTDOWN_GRACE};
pub use handle::{ScheduleStatus, TaskInfo};
pub use manager::{ManagerSlot, ScheduleError, ScheduleManager};
pub use retry::RetryPolicy;
pub use task::{FnTask, ScheduledTask, TaskError, TaskRegistration, TaskScope, TaskTiming};
