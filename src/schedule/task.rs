use super::context::TaskContext;
use super::retry::RetryPolicy;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where a registered task is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScope {
    /// Every node in the cluster runs the task.
    Local,
    /// Only the node currently holding cluster leadership runs the task.
    Leader,
}

impl TaskScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskScope::Local => "local",
            TaskScope::Leader => "leader",
        }
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a task first fires and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    /// Time before the first firing.
    pub delay: Duration,
    /// Time between the end of one firing and the start of the next.
    /// `None` means the task fires exactly once.
    pub period: Option<Duration>,
}

impl TaskTiming {
    pub fn one_shot(delay: Duration) -> Self {
        Self {
            delay,
            period: None,
        }
    }

    pub fn repeating(delay: Duration, period: Duration) -> Self {
        Self {
            delay,
            period: Some(period),
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.period.is_some()
    }
}

/// Errors raised by a single task execution.
///
/// These never leave the firing that produced them.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Task was cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::ExecutionFailed(format!("{:#}", err))
    }
}

/// A unit of schedulable work.
///
/// Implementers supply the work in `execute`; the scheduling infrastructure
/// supplies timing and locus. Executions run on the blocking pool, so they
/// may block, but long-running work should poll `ctx.is_cancelled()`.
pub trait ScheduledTask: Send + Sync {
    /// Identifier, unique among the tasks registered on one driver.
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn timing(&self) -> TaskTiming;

    fn delay(&self) -> Duration {
        self.timing().delay
    }

    fn period(&self) -> Option<Duration> {
        self.timing().period
    }

    fn is_repeating(&self) -> bool {
        self.timing().is_repeating()
    }

    /// How a failing firing is retried before it is recorded as failed.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// A task together with the scope it was registered under.
#[derive(Clone)]
pub struct TaskRegistration {
    pub task: Arc<dyn ScheduledTask>,
    pub scope: TaskScope,
}

impl TaskRegistration {
    pub fn local(task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            task,
            scope: TaskScope::Local,
        }
    }

    pub fn leader(task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            task,
            scope: TaskScope::Leader,
        }
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }
}

impl fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("id", &self.task.id())
            .field("scope", &self.scope)
            .field("timing", &self.task.timing())
            .finish()
    }
}

type TaskFn = dyn Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync;

/// Closure-backed task for subsystems that don't need a dedicated type.
pub struct FnTask {
    id: String,
    description: String,
    timing: TaskTiming,
    retry_policy: RetryPolicy,
    func: Box<TaskFn>,
}

impl FnTask {
    pub fn new<F>(id: impl Into<String>, timing: TaskTiming, func: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: String::new(),
            timing,
            retry_policy: RetryPolicy::none(),
            func: Box::new(func),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl ScheduledTask for FnTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timing(&self) -> TaskTiming {
        self.timing
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_timing_one_shot() {
        let timing = TaskTiming::one_shot(Duration::from_secs(5));
        assert_eq!(timing.delay, Duration::from_secs(5));
        assert!(timing.period.is_none());
        assert!(!timing.is_repeating());
    }

    #[test]
    fn test_timing_repeating() {
        let timing = TaskTiming::repeating(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(timing.period, Some(Duration::from_secs(60)));
        assert!(timing.is_repeating());
    }

    #[test]
    fn test_scope_as_str() {
        assert_eq!(TaskScope::Local.as_str(), "local");
        assert_eq!(TaskScope::Leader.to_string(), "leader");
    }

    #[test]
    fn test_fn_task_delegates_to_closure() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let task = FnTask::new(
            "counter",
            TaskTiming::repeating(Duration::from_millis(10), Duration::from_secs(1)),
            move |_ctx| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .with_description("Counts its firings");

        assert_eq!(task.id(), "counter");
        assert_eq!(task.description(), "Counts its firings");
        assert_eq!(task.delay(), Duration::from_millis(10));
        assert_eq!(task.period(), Some(Duration::from_secs(1)));
        assert!(task.is_repeating());
        assert_eq!(task.retry_policy().max_retries, 0);

        let ctx = TaskContext::new(CancellationToken::new(), "node-a", TaskScope::Local, None, 1);
        task.execute(&ctx).unwrap();
        task.execute(&ctx).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registration_scope_tags() {
        let task: Arc<dyn ScheduledTask> = Arc::new(FnTask::new(
            "noop",
            TaskTiming::one_shot(Duration::ZERO),
            |_| Ok(()),
        ));

        let local = TaskRegistration::local(task.clone());
        let leader = TaskRegistration::leader(task);
        assert_eq!(local.scope, TaskScope::Local);
        assert_eq!(leader.scope, TaskScope::Leader);
        assert_eq!(leader.id(), "noop");
    }

    #[test]
    fn test_task_error_from_anyhow() {
        let err: TaskError = anyhow::anyhow!("disk full").context("writing snapshot").into();
        let msg = err.to_string();
        assert!(msg.contains("writing snapshot"));
        assert!(msg.contains("disk full"));
    }
}
