use super::{publish, ElectionError, LeaderElector, Leadership};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::info;

/// Elector whose leadership is decided by an external signal.
///
/// Used for operator-driven failover drills and to simulate leadership
/// changes in tests. `grant` opens a new epoch; `revoke` steps down.
pub struct ManualElector {
    node_id: String,
    epoch: AtomicU64,
    unreachable: AtomicBool,
    tx: watch::Sender<Leadership>,
}

impl ManualElector {
    pub fn new(node_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Leadership::default());
        Self {
            node_id: node_id.into(),
            epoch: AtomicU64::new(0),
            unreachable: AtomicBool::new(false),
            tx,
        }
    }

    /// Make the node leader under a fresh epoch. Returns the epoch.
    pub fn grant(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Leadership granted to {} (epoch {})", self.node_id, epoch);
        publish(&self.tx, Leadership::leader(epoch));
        epoch
    }

    /// Step down. No-op when not leading.
    pub fn revoke(&self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if publish(&self.tx, Leadership::follower(epoch)) {
            info!("Leadership revoked from {} (epoch {})", self.node_id, epoch);
        }
    }

    /// Simulate an unreachable coordination service: `start` fails while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderElector for ManualElector {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn start(&self) -> Result<(), ElectionError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ElectionError::Unreachable(format!(
                "manual coordination for {} is marked unreachable",
                self.node_id
            )));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ElectionError> {
        self.revoke();
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Leadership> {
        self.tx.subscribe()
    }
}
