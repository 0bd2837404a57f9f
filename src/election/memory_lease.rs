use super::lease::{next_lease, Lease, LeaseStore};
use crate::schedule::lock;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Lease store living in process memory.
///
/// Electors sharing one instance behind an `Arc` form a cluster inside a
/// single process, which is how embedded deployments and tests run
/// several nodes side by side.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
    unreachable: AtomicBool,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a partition: every operation fails while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("in-memory lease store is unreachable");
        }
        Ok(())
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now_ms: i64,
    ) -> Result<Option<Lease>> {
        self.check_reachable()?;
        let mut leases = lock(&self.leases);
        match next_lease(leases.get(name), name, holder, ttl, now_ms) {
            Some(lease) => {
                leases.insert(name.to_string(), lease.clone());
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    fn release(&self, name: &str, holder: &str) -> Result<bool> {
        self.check_reachable()?;
        let mut leases = lock(&self.leases);
        match leases.get_mut(name) {
            Some(lease) if lease.holder == holder => {
                // Row stays so the next holder continues the epoch sequence
                lease.holder.clear();
                lease.expires_at_ms = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn current(&self, name: &str) -> Result<Option<Lease>> {
        self.check_reachable()?;
        let leases = lock(&self.leases);
        Ok(leases.get(name).filter(|l| !l.holder.is_empty()).cloned())
    }
}
