use super::clock::{lock, TaskClock, TaskEntry};
use super::driver::{CoordinationDriver, DriverError};
use super::handle::ScheduleStatus;
use super::task::{ScheduledTask, TaskRegistration, TaskScope};
use crate::election::{LeaderElector, Leadership};
use crate::server::metrics;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time to wait for in-flight executions on stop.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

enum Phase {
    Idle,
    /// Elector start in progress.
    Starting,
    Running {
        runtime: Handle,
        watcher_token: CancellationToken,
        watcher: Option<JoinHandle<()>>,
    },
    Stopped,
}

/// Leader tasks armed for one leadership epoch.
struct EpochArming {
    epoch: u64,
    token: CancellationToken,
}

struct DriverState {
    phase: Phase,
    local_tasks: Vec<Arc<TaskEntry>>,
    leader_tasks: Vec<Arc<TaskEntry>>,
    arming: Option<EpochArming>,
}

impl DriverState {
    fn contains(&self, id: &str) -> bool {
        self.local_tasks
            .iter()
            .chain(self.leader_tasks.iter())
            .any(|e| e.id() == id)
    }
}

struct DriverShared {
    elector: Arc<dyn LeaderElector>,
    clock: TaskClock,
    state: Mutex<DriverState>,
}

impl DriverShared {
    /// Bring armed leader tasks in line with `leadership`.
    fn apply_leadership(&self, state: &mut DriverState, leadership: Leadership) {
        let Phase::Running { runtime, .. } = &state.phase else {
            return;
        };

        if leadership.is_leader {
            if state.arming.as_ref().map(|a| a.epoch) == Some(leadership.epoch) {
                return;
            }
            if let Some(previous) = state.arming.take() {
                previous.token.cancel();
            }

            info!(
                "Node {} is leader (epoch {}), arming {} leader tasks",
                self.clock.node_id(),
                leadership.epoch,
                state.leader_tasks.len()
            );
            let token = self.clock.child_token();
            for entry in &state.leader_tasks {
                self.clock
                    .arm(runtime, Arc::clone(entry), token.clone(), Some(leadership.epoch));
            }
            state.arming = Some(EpochArming {
                epoch: leadership.epoch,
                token,
            });
            metrics::set_leadership(self.clock.node_id(), true, leadership.epoch);
            metrics::record_leadership_change(self.clock.node_id(), "acquired");
        } else if let Some(previous) = state.arming.take() {
            info!(
                "Node {} lost leadership (epoch {}), disarming leader tasks",
                self.clock.node_id(),
                previous.epoch
            );
            // In-flight executions run to completion; only future firings stop
            previous.token.cancel();
            metrics::set_leadership(self.clock.node_id(), false, previous.epoch);
            metrics::record_leadership_change(self.clock.node_id(), "lost");
        }
    }

    async fn watch_leadership(
        self: Arc<Self>,
        mut rx: watch::Receiver<Leadership>,
        token: CancellationToken,
    ) {
        loop {
            let leadership = *rx.borrow_and_update();
            self.apply_leadership(&mut lock(&self.state), leadership);

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        warn!("Leadership channel closed for node {}", self.clock.node_id());
                        break;
                    }
                }
            }
        }
        debug!("Leadership watcher for {} stopped", self.clock.node_id());
    }
}

/// Coordination driver built on a `LeaderElector`.
///
/// Node-local tasks are armed once at start. Leader tasks are armed each
/// time a new leadership epoch begins, under a cancellation token scoped to
/// that epoch, so their delay is measured from the moment leadership was
/// acquired and their firings stop as soon as it is lost.
pub struct ElectionDriver {
    shared: Arc<DriverShared>,
    shutdown_grace: Duration,
}

impl ElectionDriver {
    pub fn new(elector: Arc<dyn LeaderElector>, worker_threads: usize) -> Self {
        let clock = TaskClock::new(elector.node_id(), worker_threads);
        Self {
            shared: Arc::new(DriverShared {
                elector,
                clock,
                state: Mutex::new(DriverState {
                    phase: Phase::Idle,
                    local_tasks: Vec::new(),
                    leader_tasks: Vec::new(),
                    arming: None,
                }),
            }),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn node_id(&self) -> &str {
        self.shared.clock.node_id()
    }

    pub fn worker_threads(&self) -> usize {
        self.shared.clock.worker_count()
    }

    fn register(&self, registration: TaskRegistration) -> Result<(), DriverError> {
        let mut state = lock(&self.shared.state);
        if matches!(state.phase, Phase::Stopped) {
            return Err(DriverError::Stopped);
        }
        if state.contains(registration.id()) {
            return Err(DriverError::DuplicateTask(registration.id().to_string()));
        }

        let scope = registration.scope;
        let entry = Arc::new(TaskEntry::new(registration));
        info!("Registered {} task {}", scope, entry.id());

        if let Phase::Running { runtime, .. } = &state.phase {
            match scope {
                TaskScope::Local => {
                    self.shared.clock.arm(
                        runtime,
                        Arc::clone(&entry),
                        self.shared.clock.child_token(),
                        None,
                    );
                }
                TaskScope::Leader => {
                    if let Some(arming) = &state.arming {
                        self.shared.clock.arm(
                            runtime,
                            Arc::clone(&entry),
                            arming.token.clone(),
                            Some(arming.epoch),
                        );
                    }
                }
            }
        }

        match scope {
            TaskScope::Local => state.local_tasks.push(entry),
            TaskScope::Leader => state.leader_tasks.push(entry),
        }
        Ok(())
    }

    /// Switch from `Starting` to `Running`, arming local tasks and leader
    /// tasks if the node already leads. Returns false if the driver was
    /// stopped in the meantime.
    fn enter_running(&self, runtime: Handle, rx: watch::Receiver<Leadership>) -> bool {
        let mut state = lock(&self.shared.state);
        if !matches!(state.phase, Phase::Starting) {
            return false;
        }

        let watcher_token = self.shared.clock.child_token();
        state.phase = Phase::Running {
            runtime: runtime.clone(),
            watcher_token: watcher_token.clone(),
            watcher: None,
        };

        for entry in &state.local_tasks {
            self.shared
                .clock
                .arm(&runtime, Arc::clone(entry), self.shared.clock.child_token(), None);
        }
        let leadership = *rx.borrow();
        self.shared.apply_leadership(&mut state, leadership);

        let watcher = runtime.spawn(Arc::clone(&self.shared).watch_leadership(rx, watcher_token));
        if let Phase::Running { watcher: slot, .. } = &mut state.phase {
            *slot = Some(watcher);
        }

        info!(
            "Coordination driver started: {} local tasks armed, leader: {}",
            state.local_tasks.len(),
            state.arming.is_some()
        );
        true
    }
}

#[async_trait]
impl CoordinationDriver for ElectionDriver {
    async fn start_driver(&self) -> Result<(), DriverError> {
        let runtime = Handle::try_current().map_err(|_| DriverError::NoRuntime)?;

        {
            let mut state = lock(&self.shared.state);
            match state.phase {
                Phase::Idle => {}
                Phase::Starting | Phase::Running { .. } => {
                    return Err(DriverError::AlreadyStarted)
                }
                Phase::Stopped => return Err(DriverError::Stopped),
            }
            state.phase = Phase::Starting;
        }

        info!("Starting coordination driver for node {}", self.node_id());
        if let Err(e) = self.shared.elector.start().await {
            let mut state = lock(&self.shared.state);
            if matches!(state.phase, Phase::Starting) {
                state.phase = Phase::Idle;
            }
            warn!("Failed to join leader election: {}", e);
            return Err(e.into());
        }

        let rx = self.shared.elector.subscribe();
        if !self.enter_running(runtime, rx) {
            // Stopped while the elector was starting
            self.shared.elector.stop().await?;
            return Err(DriverError::Stopped);
        }
        Ok(())
    }

    async fn stop_driver(&self) -> Result<(), DriverError> {
        let previous = {
            let mut state = lock(&self.shared.state);
            if matches!(state.phase, Phase::Idle) {
                debug!("Coordination driver stop requested before start");
                return Ok(());
            }
            if let Some(arming) = state.arming.take() {
                arming.token.cancel();
            }
            std::mem::replace(&mut state.phase, Phase::Stopped)
        };

        let Phase::Running {
            watcher_token,
            watcher,
            ..
        } = previous
        else {
            // Already stopped, or the pending start will observe the stop
            return Ok(());
        };

        info!("Stopping coordination driver for node {}", self.node_id());
        watcher_token.cancel();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        // Leadership is released only once in-flight executions are done
        if !self.shared.clock.shutdown(self.shutdown_grace).await {
            warn!("Some task executions did not finish within the shutdown grace period");
        }
        let result = self.shared.elector.stop().await;

        metrics::set_leadership(self.node_id(), false, self.shared.elector.current().epoch);
        info!("Coordination driver stopped");
        result.map_err(DriverError::from)
    }

    fn set_scheduled_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), DriverError> {
        self.register(TaskRegistration::local(task))
    }

    fn set_scheduled_leader_task(&self, task: Arc<dyn ScheduledTask>) -> Result<(), DriverError> {
        self.register(TaskRegistration::leader(task))
    }

    fn is_leader(&self) -> bool {
        lock(&self.shared.state).arming.is_some()
    }

    fn status(&self) -> ScheduleStatus {
        let state = lock(&self.shared.state);
        let epoch = state.arming.as_ref().map(|a| a.epoch);
        ScheduleStatus::new(self.node_id(), epoch.is_some(), epoch).with_tasks(
            state
                .local_tasks
                .iter()
                .chain(state.leader_tasks.iter())
                .map(|e| e.as_ref()),
        )
    }
}
