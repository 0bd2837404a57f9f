use super::task::TaskScope;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to tasks during execution.
///
/// The cancellation token is tripped when the scheduler stops or, for
/// leader tasks, when the local node loses leadership. Executions are never
/// interrupted forcibly; checking the token is up to the task.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub cancellation_token: CancellationToken,

    /// Identifier of the node running this firing.
    pub node_id: Arc<str>,

    pub scope: TaskScope,

    /// Leadership epoch this firing belongs to. Always `Some` for leader
    /// tasks and usable as a fencing token towards external systems.
    pub epoch: Option<u64>,

    /// 1-based firing sequence number within the current arming of the task.
    pub firing: u64,
}

impl TaskContext {
    pub fn new(
        cancellation_token: CancellationToken,
        node_id: impl Into<Arc<str>>,
        scope: TaskScope,
        epoch: Option<u64>,
        firing: u64,
    ) -> Self {
        Self {
            cancellation_token,
            node_id: node_id.into(),
            scope,
            epoch,
            firing,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Long-running tasks should check this periodically and return
    /// `TaskError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
