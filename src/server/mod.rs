pub mod metrics;
pub mod server;
pub mod state;

pub use server::{make_app, make_metrics_app, WebServer};
pub use state::ServerState;
