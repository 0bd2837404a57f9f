//! Tasks that record their firings

use cluster_scheduler::schedule::{FnTask, TaskTiming};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Firing {
    pub task: String,
    pub node: String,
    pub epoch: Option<u64>,
    pub firing: u64,
    pub started: Instant,
    pub finished: Instant,
}

/// Log shared by every task created from it, across nodes.
#[derive(Clone, Default)]
pub struct FiringLog {
    firings: Arc<Mutex<Vec<Firing>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl FiringLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: &str, timing: TaskTiming) -> Arc<FnTask> {
        self.slow_task(id, timing, Duration::ZERO)
    }

    /// Task whose every execution takes `work`.
    pub fn slow_task(&self, id: &str, timing: TaskTiming, work: Duration) -> Arc<FnTask> {
        self.failing_task(id, timing, work, None)
    }

    /// Task that fails on firing `fail_on`, if set.
    pub fn failing_task(
        &self,
        id: &str,
        timing: TaskTiming,
        work: Duration,
        fail_on: Option<u64>,
    ) -> Arc<FnTask> {
        let log = self.clone();
        let task_id = id.to_string();
        Arc::new(FnTask::new(id, timing, move |ctx| {
            let now_running = log.running.fetch_add(1, Ordering::SeqCst) + 1;
            log.max_running.fetch_max(now_running, Ordering::SeqCst);

            let started = Instant::now();
            if !work.is_zero() {
                std::thread::sleep(work);
            }
            log.firings.lock().unwrap().push(Firing {
                task: task_id.clone(),
                node: ctx.node_id.to_string(),
                epoch: ctx.epoch,
                firing: ctx.firing,
                started,
                finished: Instant::now(),
            });

            log.running.fetch_sub(1, Ordering::SeqCst);
            if fail_on == Some(ctx.firing) {
                return Err(cluster_scheduler::TaskError::ExecutionFailed(format!(
                    "firing {} fails on purpose",
                    ctx.firing
                )));
            }
            Ok(())
        }))
    }

    pub fn firings(&self) -> Vec<Firing> {
        self.firings.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.firings.lock().unwrap().len()
    }

    pub fn count_for(&self, task: &str) -> usize {
        self.firings
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.task == task)
            .count()
    }

    /// Highest number of executions observed running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}
