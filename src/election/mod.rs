//! Leader election backends.
//!
//! A `LeaderElector` publishes the local node's view of cluster leadership
//! on a watch channel. Every continuous stretch of leadership carries an
//! epoch number that grows across the cluster, so it doubles as a fencing
//! token for work done on behalf of the leader.

mod lease;
mod manual;
mod memory_lease;
mod solo;
mod sqlite_lease;

pub use lease::{Lease, LeaseElector, LeaseElectorConfig, LeaseStore};
pub use manual::ManualElector;
pub use memory_lease::InMemoryLeaseStore;
pub use solo::SoloElector;
pub use sqlite_lease::SqliteLeaseStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Local view of leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Leadership {
    /// Epoch of the most recent leadership this node held or holds.
    pub epoch: u64,
    pub is_leader: bool,
}

impl Leadership {
    pub fn leader(epoch: u64) -> Self {
        Self {
            epoch,
            is_leader: true,
        }
    }

    pub fn follower(epoch: u64) -> Self {
        Self {
            epoch,
            is_leader: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("Coordination service unreachable: {0}")]
    Unreachable(String),

    #[error("Lease store error: {0}")]
    Store(String),

    #[error("Elector is already started")]
    AlreadyStarted,
}

#[async_trait]
pub trait LeaderElector: Send + Sync {
    fn node_id(&self) -> &str;

    /// Begin participating in the election.
    ///
    /// Fails if the coordination service can't be reached; the elector is
    /// then left stopped and `start` may be retried.
    async fn start(&self) -> Result<(), ElectionError>;

    /// Leave the election and give up leadership if held.
    async fn stop(&self) -> Result<(), ElectionError>;

    fn subscribe(&self) -> watch::Receiver<Leadership>;

    fn current(&self) -> Leadership {
        *self.subscribe().borrow()
    }
}

/// Publish `next` on `tx` if it differs from the current value.
///
/// Returns true when the value changed.
pub(crate) fn publish(tx: &watch::Sender<Leadership>, next: Leadership) -> bool {
    tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    })
}
