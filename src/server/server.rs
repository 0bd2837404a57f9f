use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::metrics::metrics_handler;
use super::state::ServerState;
use crate::schedule::lock;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub version: String,
    pub node_id: String,
    pub is_leader: bool,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let status = state.manager.status();
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: status.node_id,
        is_leader: status.is_leader,
    })
}

async fn get_schedule(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.manager.status())
}

async fn get_scheduled_task(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.status().task(&id) {
        Some(info) => Json(info.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn make_app(state: ServerState) -> Router {
    let schedule_routes: Router = Router::new()
        .route("/", get(get_schedule))
        .route("/{id}", get(get_scheduled_task))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state)
        .nest("/v1/schedule", schedule_routes)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

/// An HTTP server that can be started on a port and stopped again.
pub struct WebServer {
    name: &'static str,
    app: Router,
    running: Mutex<Option<RunningServer>>,
}

impl WebServer {
    pub fn new(name: &'static str, app: Router) -> Self {
        Self {
            name,
            app,
            running: Mutex::new(None),
        }
    }

    /// Bind `127.0.0.1:port` and serve in the background. Port 0 picks a
    /// free port; the bound address is returned.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        if let Some(running) = lock(&self.running).as_ref() {
            bail!("{} server already running on {}", self.name, running.local_addr);
        }

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
            .await
            .with_context(|| format!("Failed to bind {} server to port {}", self.name, port))?;
        let local_addr = listener.local_addr()?;

        let mut running = lock(&self.running);
        if let Some(other) = running.as_ref() {
            bail!("{} server already running on {}", self.name, other.local_addr);
        }

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let serve = axum::serve(listener, self.app.clone())
            .with_graceful_shutdown(async move { signal.cancelled().await });
        let handle = tokio::spawn(async move { serve.await });

        info!("{} server listening on {}", self.name, local_addr);
        *running = Some(RunningServer {
            local_addr,
            shutdown,
            handle,
        });
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|r| r.local_addr)
    }

    /// Stop accepting connections and wait for open requests to complete.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = lock(&self.running).take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        match running.handle.await {
            Ok(Ok(())) => {
                info!("{} server on {} stopped", self.name, running.local_addr);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("{} server exited with error: {}", self.name, e);
                Err(e.into())
            }
            Err(e) => bail!("{} server task failed: {}", self.name, e),
        }
    }
}
