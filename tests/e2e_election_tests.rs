//! End-to-end tests for leader tasks across several nodes
//!
//! Nodes run in one process and elect their leader through a shared lease
//! store. Leader-task firings from all nodes go into one log, which must
//! never show two executions of the same task running at once.

mod common;

use cluster_scheduler::election::{InMemoryLeaseStore, LeaderElector, LeaseStore, SqliteLeaseStore};
use cluster_scheduler::schedule::TaskTiming;
use common::{lease_node, wait_until, Firing, FiringLog, FlakyLeaseStore, SETTLE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn assert_exclusive(firings: &[Firing]) {
    let mut sorted = firings.to_vec();
    sorted.sort_by_key(|f| f.started);
    for pair in sorted.windows(2) {
        assert!(
            pair[1].started >= pair[0].finished,
            "{} (epoch {:?}) overlapped {} (epoch {:?})",
            pair[1].node,
            pair[1].epoch,
            pair[0].node,
            pair[0].epoch
        );
        assert!(pair[1].epoch >= pair[0].epoch, "epochs went backwards");
    }
}

fn leader_job(log: &FiringLog) -> Arc<cluster_scheduler::FnTask> {
    log.slow_task(
        "leader_job",
        TaskTiming::repeating(Duration::ZERO, Duration::from_millis(30)),
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn test_single_leader_among_nodes() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let log = FiringLog::new();
    let nodes: Vec<_> = ["node-a", "node-b", "node-c"]
        .iter()
        .map(|id| lease_node(id, store.clone()))
        .collect();

    for node in &nodes {
        node.manager.register_leader_task(leader_job(&log)).unwrap();
        node.manager.start().await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    let leaders = nodes.iter().filter(|n| n.manager.is_leader()).count();
    assert_eq!(leaders, 1);

    for node in &nodes {
        node.manager.stop().await.unwrap();
    }

    let firings = log.firings();
    assert!(!firings.is_empty());
    assert!(firings.iter().all(|f| f.node == "node-a"), "first starter keeps leading");
    assert_exclusive(&firings);
}

#[tokio::test]
async fn test_failover_when_leader_stops() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let log = FiringLog::new();
    let node_a = lease_node("node-a", store.clone());
    let node_b = lease_node("node-b", store.clone());

    for node in [&node_a, &node_b] {
        node.manager.register_leader_task(leader_job(&log)).unwrap();
        node.manager.start().await.unwrap();
    }
    assert!(node_a.manager.is_leader());
    assert!(!node_b.manager.is_leader());

    tokio::time::sleep(Duration::from_millis(200)).await;
    node_a.manager.stop().await.unwrap();

    assert!(wait_until(SETTLE_TIMEOUT, || node_b.manager.is_leader()).await);
    assert!(wait_until(SETTLE_TIMEOUT, || log.firings().iter().any(|f| f.node == "node-b")).await);
    node_b.manager.stop().await.unwrap();

    let firings = log.firings();
    assert_exclusive(&firings);
    let a_epoch = firings.iter().find(|f| f.node == "node-a").unwrap().epoch;
    let b_epoch = firings.iter().find(|f| f.node == "node-b").unwrap().epoch;
    assert_eq!(a_epoch, Some(1));
    assert_eq!(b_epoch, Some(2));
}

#[tokio::test]
async fn test_partitioned_leader_steps_down_before_takeover() {
    let shared = Arc::new(InMemoryLeaseStore::new());
    let partitionable = Arc::new(FlakyLeaseStore::new(shared.clone()));
    let log = FiringLog::new();
    let node_a = lease_node("node-a", partitionable.clone());
    let node_b = lease_node("node-b", shared.clone());

    node_a.manager.register_leader_task(leader_job(&log)).unwrap();
    node_a.manager.start().await.unwrap();
    node_b.manager.register_leader_task(leader_job(&log)).unwrap();
    node_b.manager.start().await.unwrap();
    assert!(node_a.manager.is_leader());

    tokio::time::sleep(Duration::from_millis(150)).await;
    partitionable.set_partitioned(true);

    assert!(wait_until(SETTLE_TIMEOUT, || !node_a.manager.is_leader()).await);
    assert!(wait_until(SETTLE_TIMEOUT, || node_b.manager.is_leader()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    node_b.manager.stop().await.unwrap();
    partitionable.set_partitioned(false);
    node_a.manager.stop().await.unwrap();

    let firings = log.firings();
    assert!(firings.iter().any(|f| f.node == "node-a"));
    assert!(firings.iter().any(|f| f.node == "node-b"));
    assert_exclusive(&firings);
}

#[tokio::test]
async fn test_stalled_leader_steps_down_before_takeover() {
    let shared = Arc::new(InMemoryLeaseStore::new());
    let stallable = Arc::new(FlakyLeaseStore::new(shared.clone()));
    let log = FiringLog::new();
    let node_a = lease_node("node-a", stallable.clone());
    let node_b = lease_node("node-b", shared.clone());

    node_a.manager.register_leader_task(leader_job(&log)).unwrap();
    node_a.manager.start().await.unwrap();
    node_b.manager.register_leader_task(leader_job(&log)).unwrap();
    node_b.manager.start().await.unwrap();
    assert!(node_a.manager.is_leader());

    // Renewals now hang far past the lease TTL instead of failing
    stallable.set_acquire_stall(Duration::from_millis(1500));

    assert!(wait_until(SETTLE_TIMEOUT, || node_b.manager.is_leader()).await);
    assert!(!node_a.manager.is_leader());
    for _ in 0..50 {
        assert!(
            !(node_a.manager.is_leader() && node_b.manager.is_leader()),
            "two nodes lead at once"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node_b.manager.status().epoch, Some(2));

    stallable.set_acquire_stall(Duration::ZERO);
    node_b.manager.stop().await.unwrap();
    node_a.manager.stop().await.unwrap();
    assert_exclusive(&log.firings());
}

#[tokio::test]
async fn test_sqlite_lease_shared_by_nodes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("leases.db");
    let store_a: Arc<dyn LeaseStore> = Arc::new(SqliteLeaseStore::new(&path).unwrap());
    let store_b: Arc<dyn LeaseStore> = Arc::new(SqliteLeaseStore::new(&path).unwrap());

    let node_a = lease_node("node-a", store_a);
    let node_b = lease_node("node-b", store_b.clone());
    node_a.manager.start().await.unwrap();
    node_b.manager.start().await.unwrap();

    assert!(node_a.manager.is_leader());
    assert!(!node_b.manager.is_leader());
    let lease = store_b.current("e2e-leader").unwrap().unwrap();
    assert_eq!(lease.holder, "node-a");

    node_a.manager.stop().await.unwrap();
    assert!(wait_until(SETTLE_TIMEOUT, || node_b.manager.is_leader()).await);
    assert_eq!(node_b.elector.current().epoch, 2);

    node_b.manager.stop().await.unwrap();
    assert!(store_b.current("e2e-leader").unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_store_fails_start_and_retry_succeeds() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let node = lease_node("node-a", store.clone());

    store.set_unreachable(true);
    assert!(node.manager.start().await.is_err());
    assert!(!node.manager.is_started());

    store.set_unreachable(false);
    node.manager.start().await.unwrap();
    assert!(node.manager.is_leader());
    node.manager.stop().await.unwrap();
}
