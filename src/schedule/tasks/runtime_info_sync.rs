use crate::runtime_info::RuntimeInfoStore;
use crate::schedule::{ScheduledTask, TaskContext, TaskError, TaskTiming};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Rewrites the runtime info file on every node.
///
/// The file lives in the temp directory, where cleaners may delete it while
/// the service is up; rewriting it periodically puts it back.
pub struct RuntimeInfoSyncTask {
    store: Arc<RuntimeInfoStore>,
    interval: Duration,
}

impl RuntimeInfoSyncTask {
    pub const ID: &'static str = "runtime_info_sync";

    pub fn new(store: Arc<RuntimeInfoStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

impl ScheduledTask for RuntimeInfoSyncTask {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Rewrite the runtime info file"
    }

    fn timing(&self) -> TaskTiming {
        TaskTiming::repeating(Duration::ZERO, self.interval)
    }

    fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.store
            .synchronize()
            .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?;
        debug!("Runtime info written to {:?}", self.store.path());
        Ok(())
    }
}
