//! Cluster Scheduler Library
//!
//! Scheduled-task coordination for clustered services: node-local tasks
//! that run everywhere and leader tasks that run on exactly one elected
//! node, plus the small service plumbing around them.

pub mod config;
pub mod election;
pub mod immutable;
pub mod query;
pub mod runtime_info;
pub mod schedule;
pub mod server;
pub mod service;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use election::{LeaderElector, Leadership};
pub use schedule::{
    CoordinationDriver, ElectionDriver, FnTask, ManagerSlot, ScheduleError, ScheduleManager,
    ScheduledTask, TaskContext, TaskError, TaskTiming,
};
pub use service::{RunningService, ServiceContext};
