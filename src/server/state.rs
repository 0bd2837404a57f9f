use crate::schedule::ScheduleManager;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct ServerState {
    pub start_time: Instant,
    pub manager: Arc<ScheduleManager>,
    pub hash: String,
}

impl ServerState {
    pub fn new(manager: Arc<ScheduleManager>) -> Self {
        Self {
            start_time: Instant::now(),
            manager,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}
