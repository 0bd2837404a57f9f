use super::{publish, ElectionError, LeaderElector, Leadership};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::info;

/// Elector for single-node deployments: the node leads itself from start
/// until stop, so leader tasks behave like plain node-local tasks.
pub struct SoloElector {
    node_id: String,
    epoch: AtomicU64,
    tx: watch::Sender<Leadership>,
}

impl SoloElector {
    pub fn new(node_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Leadership::default());
        Self {
            node_id: node_id.into(),
            epoch: AtomicU64::new(0),
            tx,
        }
    }
}

#[async_trait]
impl LeaderElector for SoloElector {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn start(&self) -> Result<(), ElectionError> {
        if self.tx.borrow().is_leader {
            return Err(ElectionError::AlreadyStarted);
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Node {} leads itself (epoch {})", self.node_id, epoch);
        publish(&self.tx, Leadership::leader(epoch));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ElectionError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        publish(&self.tx, Leadership::follower(epoch));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Leadership> {
        self.tx.subscribe()
    }
}
