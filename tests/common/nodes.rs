//! Cluster nodes built from the public API

use super::constants::*;
use cluster_scheduler::election::{
    InMemoryLeaseStore, Lease, LeaseElector, LeaseElectorConfig, LeaseStore, ManualElector,
};
use cluster_scheduler::schedule::{ElectionDriver, ScheduleManager};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TestNode<E> {
    pub elector: Arc<E>,
    pub manager: Arc<ScheduleManager>,
}

/// Node whose leadership the test grants and revokes.
pub fn manual_node(node_id: &str) -> TestNode<ManualElector> {
    let elector = Arc::new(ManualElector::new(node_id));
    let driver = ElectionDriver::new(elector.clone(), 4).with_shutdown_grace(SHUTDOWN_GRACE);
    TestNode {
        elector,
        manager: Arc::new(ScheduleManager::new(Arc::new(driver))),
    }
}

/// Node electing its leader through `store`.
pub fn lease_node(node_id: &str, store: Arc<dyn LeaseStore>) -> TestNode<LeaseElector> {
    let config = LeaseElectorConfig {
        lease_name: "e2e-leader".to_string(),
        ttl: TEST_LEASE_TTL,
        renew_interval: TEST_LEASE_RENEW,
    };
    let elector = Arc::new(LeaseElector::new(node_id, store, config));
    let driver = ElectionDriver::new(elector.clone(), 4).with_shutdown_grace(SHUTDOWN_GRACE);
    TestNode {
        elector,
        manager: Arc::new(ScheduleManager::new(Arc::new(driver))),
    }
}

/// Lease store view that can be cut off from the shared store, simulating
/// a partition of a single node, or made slow, simulating a stalled volume.
pub struct FlakyLeaseStore {
    inner: Arc<InMemoryLeaseStore>,
    partitioned: AtomicBool,
    acquire_stall_ms: AtomicU64,
}

impl FlakyLeaseStore {
    pub fn new(inner: Arc<InMemoryLeaseStore>) -> Self {
        Self {
            inner,
            partitioned: AtomicBool::new(false),
            acquire_stall_ms: AtomicU64::new(0),
        }
    }

    pub fn set_partitioned(&self, partitioned: bool) {
        self.partitioned.store(partitioned, Ordering::SeqCst);
    }

    /// Make every `try_acquire` block for `stall` before reaching the store.
    pub fn set_acquire_stall(&self, stall: Duration) {
        self.acquire_stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.partitioned.load(Ordering::SeqCst) {
            anyhow::bail!("partitioned from lease store");
        }
        Ok(())
    }
}

impl LeaseStore for FlakyLeaseStore {
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now_ms: i64,
    ) -> anyhow::Result<Option<Lease>> {
        self.check()?;
        let stall_ms = self.acquire_stall_ms.load(Ordering::SeqCst);
        if stall_ms > 0 {
            std::thread::sleep(Duration::from_millis(stall_ms));
        }
        self.inner.try_acquire(name, holder, ttl, now_ms)
    }

    fn release(&self, name: &str, holder: &str) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.release(name, holder)
    }

    fn current(&self, name: &str) -> anyhow::Result<Option<Lease>> {
        self.check()?;
        self.inner.current(name)
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
