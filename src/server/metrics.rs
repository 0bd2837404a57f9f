use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "cluster_scheduler";

// Gauges carry a `node` label since several nodes may share one process
// (and so one registry) when they coordinate through an in-memory lease.

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Task Metrics
    pub static ref TASK_FIRINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_firings_total"), "Total task firings by outcome"),
        &["task", "scope", "status"]
    ).expect("Failed to create task_firings_total metric");

    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_task_duration_seconds"),
            "Task firing duration in seconds, retries included"
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["task", "scope"]
    ).expect("Failed to create task_duration_seconds metric");

    pub static ref TASK_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_task_running"), "Whether a task is currently executing"),
        &["node", "task"]
    ).expect("Failed to create task_running metric");

    // Leadership Metrics
    pub static ref IS_LEADER: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_is_leader"), "1 while the node holds cluster leadership"),
        &["node"]
    ).expect("Failed to create is_leader metric");

    pub static ref LEADERSHIP_EPOCH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_leadership_epoch"), "Most recent leadership epoch seen by the node"),
        &["node"]
    ).expect("Failed to create leadership_epoch metric");

    pub static ref LEADERSHIP_CHANGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_leadership_changes_total"), "Leadership acquisitions and losses"),
        &["node", "change"]
    ).expect("Failed to create leadership_changes_total metric");

    pub static ref LEADER_HEARTBEAT_TIMESTAMP: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_leader_heartbeat_timestamp_seconds"),
            "Unix time of the last leader heartbeat sent by the node"
        ),
        &["node"]
    ).expect("Failed to create leader_heartbeat_timestamp_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(TASK_FIRINGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TASK_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(IS_LEADER.clone()));
    let _ = REGISTRY.register(Box::new(LEADERSHIP_EPOCH.clone()));
    let _ = REGISTRY.register(Box::new(LEADERSHIP_CHANGES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEADER_HEARTBEAT_TIMESTAMP.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished task firing
pub fn record_task_firing(task: &str, scope: &str, status: &str, duration: Duration) {
    TASK_FIRINGS_TOTAL
        .with_label_values(&[task, scope, status])
        .inc();

    TASK_DURATION_SECONDS
        .with_label_values(&[task, scope])
        .observe(duration.as_secs_f64());
}

pub fn set_task_running(node: &str, task: &str, running: bool) {
    TASK_RUNNING
        .with_label_values(&[node, task])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn set_leadership(node: &str, is_leader: bool, epoch: u64) {
    IS_LEADER
        .with_label_values(&[node])
        .set(if is_leader { 1.0 } else { 0.0 });
    LEADERSHIP_EPOCH.with_label_values(&[node]).set(epoch as f64);
}

/// Record a leadership transition ("acquired" or "lost")
pub fn record_leadership_change(node: &str, change: &str) {
    LEADERSHIP_CHANGES_TOTAL
        .with_label_values(&[node, change])
        .inc();
}

pub fn record_leader_heartbeat(node: &str, epoch: u64) {
    LEADERSHIP_EPOCH.with_label_values(&[node]).set(epoch as f64);
    LEADER_HEARTBEAT_TIMESTAMP
        .with_label_values(&[node])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
