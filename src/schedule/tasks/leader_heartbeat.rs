use crate::schedule::{ScheduledTask, TaskContext, TaskError, TaskTiming};
use crate::server::metrics;
use std::time::Duration;
use tracing::info;

/// Announces the current leader and its epoch at a fixed interval.
pub struct LeaderHeartbeatTask {
    interval: Duration,
}

impl LeaderHeartbeatTask {
    pub const ID: &'static str = "leader_heartbeat";

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl ScheduledTask for LeaderHeartbeatTask {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Log and publish the leader heartbeat"
    }

    fn timing(&self) -> TaskTiming {
        TaskTiming::repeating(Duration::ZERO, self.interval)
    }

    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let epoch = ctx.epoch.ok_or_else(|| {
            TaskError::ExecutionFailed("heartbeat fired outside a leadership epoch".to_string())
        })?;
        info!("Leader heartbeat from {} (epoch {})", ctx.node_id, epoch);
        metrics::record_leader_heartbeat(&ctx.node_id, epoch);
        Ok(())
    }
}
