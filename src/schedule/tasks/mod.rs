//! Tasks the service registers for itself.

mod leader_heartbeat;
mod runtime_info_sync;

pub use leader_heartbeat::LeaderHeartbeatTask;
pub use runtime_info_sync::RuntimeInfoSyncTask;
