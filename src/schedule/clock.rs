use super::context::TaskContext;
use super::retry::RetryPolicy;
use super::task::{ScheduledTask, TaskError, TaskRegistration};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest period a repeating task may use.
const MIN_PERIOD: Duration = Duration::from_millis(1);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Execution counters for one registered task.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub fire_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub is_running: bool,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A registered task plus the bookkeeping the clock keeps for it.
pub struct TaskEntry {
    registration: TaskRegistration,
    stats: Mutex<TaskStats>,
    /// Number of live firing loops for this task. More than one only while
    /// a previous leadership epoch is finishing its last execution.
    armed_loops: AtomicUsize,
    /// Held for the whole duration of a firing so that firings of the same
    /// task never overlap, even across re-armings.
    execution_lock: tokio::sync::Mutex<()>,
}

impl TaskEntry {
    pub fn new(registration: TaskRegistration) -> Self {
        Self {
            registration,
            stats: Mutex::new(TaskStats::default()),
            armed_loops: AtomicUsize::new(0),
            execution_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registration(&self) -> &TaskRegistration {
        &self.registration
    }

    pub fn id(&self) -> &str {
        self.registration.task.id()
    }

    pub fn stats(&self) -> TaskStats {
        lock(&self.stats).clone()
    }

    pub fn is_armed(&self) -> bool {
        self.armed_loops.load(Ordering::SeqCst) > 0
    }

    fn mark_started(&self) {
        let mut stats = lock(&self.stats);
        stats.fire_count += 1;
        stats.is_running = true;
        stats.last_started_at = Some(Utc::now());
    }

    fn mark_finished(&self, outcome: &FiringOutcome) {
        let mut stats = lock(&self.stats);
        stats.is_running = false;
        stats.last_finished_at = Some(Utc::now());
        match outcome {
            FiringOutcome::Succeeded => {
                stats.success_count += 1;
                stats.last_error = None;
            }
            FiringOutcome::Cancelled => {
                stats.last_error = Some("Cancelled".to_string());
            }
            FiringOutcome::Failed(msg) | FiringOutcome::Panicked(msg) => {
                stats.failure_count += 1;
                stats.last_error = Some(msg.clone());
            }
        }
    }
}

#[derive(Debug)]
enum FiringOutcome {
    Succeeded,
    Cancelled,
    Failed(String),
    Panicked(String),
}

impl FiringOutcome {
    fn status_label(&self) -> &'static str {
        match self {
            FiringOutcome::Succeeded => "success",
            FiringOutcome::Cancelled => "cancelled",
            FiringOutcome::Failed(_) => "failed",
            FiringOutcome::Panicked(_) => "panic",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, FiringOutcome::Failed(_) | FiringOutcome::Panicked(_))
    }
}

/// Per-process scheduling clock.
///
/// Every armed task gets its own async loop that sleeps until the task is
/// due; executions themselves run on the blocking pool, bounded by a fixed
/// number of worker permits regardless of how many tasks are registered.
pub struct TaskClock {
    node_id: Arc<str>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    root_token: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskClock {
    pub fn new(node_id: impl Into<Arc<str>>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            node_id: node_id.into(),
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            root_token: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Token cancelled when the clock shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.root_token.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root_token.is_cancelled()
    }

    /// Start the firing loop of `entry` on `runtime`.
    ///
    /// The loop runs until `token` (which should descend from this clock's
    /// root token) is cancelled or, for one-shot tasks, after the single
    /// firing. The initial delay is measured from this call.
    pub fn arm(
        &self,
        runtime: &Handle,
        entry: Arc<TaskEntry>,
        token: CancellationToken,
        epoch: Option<u64>,
    ) {
        if token.is_cancelled() {
            debug!("Not arming task {}: token already cancelled", entry.id());
            return;
        }

        debug!(
            "Arming {} task {} (delay: {:?}, period: {:?}, epoch: {:?})",
            entry.registration.scope,
            entry.id(),
            entry.registration.task.delay(),
            entry.registration.task.period(),
            epoch
        );

        // Counted before spawning so that status reads right after arming see it
        entry.armed_loops.fetch_add(1, Ordering::SeqCst);
        let firing_loop = FiringLoop {
            entry,
            token,
            epoch,
            node_id: Arc::clone(&self.node_id),
            workers: Arc::clone(&self.workers),
        };
        let handle = runtime.spawn(firing_loop.run());

        let mut loops = lock(&self.loops);
        loops.retain(|h| !h.is_finished());
        loops.push(handle);
    }

    /// Stop every loop and wait up to `grace` for in-flight executions.
    ///
    /// Returns false if some execution was still running when the grace
    /// period expired. Those executions keep running detached, but no task
    /// fires again after this call.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.root_token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.loops));
        if handles.is_empty() {
            return true;
        }

        info!("Waiting for {} task loops to finish...", handles.len());
        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "Task executions still running after {:?} shutdown grace period",
                    grace
                );
                false
            }
        }
    }
}

struct FiringLoop {
    entry: Arc<TaskEntry>,
    token: CancellationToken,
    epoch: Option<u64>,
    node_id: Arc<str>,
    workers: Arc<Semaphore>,
}

impl FiringLoop {
    async fn run(self) {
        let timing = self.entry.registration.task.timing();
        let mut wait = timing.delay;
        let mut firing: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            firing += 1;
            if !self.fire(firing).await {
                break;
            }

            // Fixed delay: the next wait starts after this firing completed
            match timing.period {
                Some(period) => wait = period.max(MIN_PERIOD),
                None => break,
            }
        }

        self.entry.armed_loops.fetch_sub(1, Ordering::SeqCst);
        debug!("Firing loop for task {} ended", self.entry.id());
    }

    /// Run one firing. Returns false if the loop was cancelled before the
    /// execution could start.
    async fn fire(&self, firing: u64) -> bool {
        let entry = &self.entry;

        let _execution_guard = tokio::select! {
            biased;
            _ = self.token.cancelled() => return false,
            guard = entry.execution_lock.lock() => guard,
        };

        let Some(permit) = acquire_worker(&self.workers, &self.token).await else {
            return false;
        };

        if self.token.is_cancelled() {
            return false;
        }

        let task = Arc::clone(&entry.registration.task);
        let scope = entry.registration.scope;
        let task_id = task.id().to_string();
        let ctx = TaskContext::new(
            self.token.clone(),
            Arc::clone(&self.node_id),
            scope,
            self.epoch,
            firing,
        );

        debug!(
            "Firing {} task {} (firing: {}, epoch: {:?})",
            scope, task_id, firing, self.epoch
        );
        entry.mark_started();
        metrics::set_task_running(&self.node_id, &task_id, true);

        let start_time = Instant::now();
        let outcome = execute_with_retry(task, ctx, &self.token, &self.workers, permit).await;
        let elapsed = start_time.elapsed();

        match &outcome {
            FiringOutcome::Succeeded => {
                debug!("Task {} completed successfully in {:?}", task_id, elapsed);
            }
            FiringOutcome::Cancelled => {
                info!("Task {} was cancelled after {:?}", task_id, elapsed);
            }
            FiringOutcome::Failed(msg) => {
                error!("Task {} failed after {:?}: {}", task_id, elapsed, msg);
            }
            FiringOutcome::Panicked(msg) => {
                error!("Task {} panicked after {:?}: {}", task_id, elapsed, msg);
            }
        }

        entry.mark_finished(&outcome);
        metrics::record_task_firing(&task_id, scope.as_str(), outcome.status_label(), elapsed);
        metrics::set_task_running(&self.node_id, &task_id, false);

        true
    }
}

/// Wait for a free worker. `None` once `token` is cancelled.
async fn acquire_worker(
    workers: &Arc<Semaphore>,
    token: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = Arc::clone(workers).acquire_owned() => permit.ok(),
    }
}

async fn execute_once(task: Arc<dyn ScheduledTask>, ctx: TaskContext) -> FiringOutcome {
    match tokio::task::spawn_blocking(move || task.execute(&ctx)).await {
        Ok(Ok(())) => FiringOutcome::Succeeded,
        Ok(Err(TaskError::Cancelled)) => FiringOutcome::Cancelled,
        Ok(Err(e)) => FiringOutcome::Failed(e.to_string()),
        Err(join_err) => FiringOutcome::Panicked(format!("Task panic: {}", join_err)),
    }
}

/// Run the task, retrying per its policy.
///
/// Each attempt holds a worker permit; the permit goes back to the pool
/// during backoff so other tasks can run meanwhile.
async fn execute_with_retry(
    task: Arc<dyn ScheduledTask>,
    ctx: TaskContext,
    token: &CancellationToken,
    workers: &Arc<Semaphore>,
    mut permit: OwnedSemaphorePermit,
) -> FiringOutcome {
    let policy: RetryPolicy = task.retry_policy();
    let mut retry_count = 0;

    loop {
        let outcome = execute_once(Arc::clone(&task), ctx.clone()).await;
        if !outcome.is_retryable() || !policy.should_retry(retry_count) || token.is_cancelled() {
            return outcome;
        }
        drop(permit);

        let backoff = policy.backoff(retry_count);
        warn!(
            "Task {} attempt {} failed ({:?}), retrying in {:?}",
            task.id(),
            retry_count + 1,
            outcome,
            backoff
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return outcome,
            _ = tokio::time::sleep(backoff) => {}
        }
        permit = match acquire_worker(workers, token).await {
            Some(permit) => permit,
            None => return outcome,
        };
        retry_count += 1;
    }
}
