use super::clock::TaskEntry;
use super::task::TaskScope;
use serde::Serialize;

/// Information about a registered task for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub description: String,
    pub scope: TaskScope,
    pub delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,
    /// Whether a firing loop currently exists for the task on this node.
    pub is_armed: bool,
    pub is_running: bool,
    pub fire_count: u64,
    pub failure_count: u64,
    pub last_started_at: Option<String>,
    pub last_finished_at: Option<String>,
    pub last_error: Option<String>,
}

impl From<&TaskEntry> for TaskInfo {
    fn from(entry: &TaskEntry) -> Self {
        let registration = entry.registration();
        let timing = registration.task.timing();
        let stats = entry.stats();

        TaskInfo {
            id: registration.task.id().to_string(),
            description: registration.task.description().to_string(),
            scope: registration.scope,
            delay_ms: duration_ms(timing.delay),
            period_ms: timing.period.map(duration_ms),
            is_armed: entry.is_armed(),
            is_running: stats.is_running,
            fire_count: stats.fire_count,
            failure_count: stats.failure_count,
            last_started_at: stats.last_started_at.map(|dt| dt.to_rfc3339()),
            last_finished_at: stats.last_finished_at.map(|dt| dt.to_rfc3339()),
            last_error: stats.last_error,
        }
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Snapshot of a node's scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub node_id: String,
    pub is_leader: bool,
    /// Current leadership epoch, if this node is leading.
    pub epoch: Option<u64>,
    pub tasks: Vec<TaskInfo>,
}

impl ScheduleStatus {
    pub fn new(node_id: impl Into<String>, is_leader: bool, epoch: Option<u64>) -> Self {
        Self {
            node_id: node_id.into(),
            is_leader,
            epoch,
            tasks: Vec::new(),
        }
    }

    /// Attach task infos, sorted by id for consistent ordering.
    pub fn with_tasks<'a>(mut self, entries: impl IntoIterator<Item = &'a TaskEntry>) -> Self {
        self.tasks = entries.into_iter().map(TaskInfo::from).collect();
        self.tasks.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }

    pub fn task(&self, id: &str) -> Option<&TaskInfo> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
