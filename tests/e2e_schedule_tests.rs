//! End-to-end tests for task scheduling through the schedule manager
//!
//! Covers manager lifecycle, fixed-delay repetition, failure isolation and
//! leader tasks driven by simulated leadership changes.

mod common;

use cluster_scheduler::election::SoloElector;
use cluster_scheduler::schedule::{
    CoordinationDriver, ElectionDriver, ManagerSlot, ScheduleError, TaskTiming,
};
use common::{manual_node, wait_until, FiringLog, SETTLE_TIMEOUT};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn solo_driver(node_id: &str) -> Arc<dyn CoordinationDriver> {
    Arc::new(ElectionDriver::new(Arc::new(SoloElector::new(node_id)), 2))
}

#[test]
fn test_concurrent_first_calls_share_one_manager() {
    for _ in 0..20 {
        let slot = Arc::new(ManagerSlot::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = slot.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let driver = solo_driver(&format!("node-{}", i));
                    barrier.wait();
                    slot.get_or_init(driver)
                })
            })
            .collect();

        let managers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));
    }
}

#[test]
fn test_get_before_and_after_init() {
    let slot = ManagerSlot::new();
    assert!(matches!(slot.get(), Err(ScheduleError::NotStarted)));
    assert!(matches!(slot.get(), Err(ScheduleError::NotStarted)));

    let created = slot.get_or_init(solo_driver("node-a"));
    for _ in 0..3 {
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &created));
    }
}

#[tokio::test]
async fn test_repeating_task_fire_count_over_window() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    let period = Duration::from_millis(100);
    let window = Duration::from_millis(1050);
    node.manager
        .register_task(log.task("tick", TaskTiming::repeating(Duration::ZERO, period)))
        .unwrap();

    node.manager.start().await.unwrap();
    tokio::time::sleep(window).await;
    node.manager.stop().await.unwrap();

    // floor(W / P) = 10, give or take one
    let count = log.count();
    assert!((9..=11).contains(&count), "fired {} times", count);
}

#[tokio::test]
async fn test_slow_task_firings_never_overlap() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    let period = Duration::from_millis(20);
    node.manager
        .register_task(log.slow_task(
            "slow",
            TaskTiming::repeating(Duration::ZERO, period),
            Duration::from_millis(150),
        ))
        .unwrap();

    node.manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    node.manager.stop().await.unwrap();

    let firings = log.firings();
    assert!(firings.len() >= 3, "fired {} times", firings.len());
    assert_eq!(log.max_concurrent(), 1);

    for pair in firings.windows(2) {
        assert!(pair[1].started >= pair[0].finished, "firings overlapped");
        // Fixed delay: the period counts from the end of the previous run
        assert!(
            pair[1].started - pair[0].finished >= period - Duration::from_millis(2),
            "next firing started too early"
        );
    }
}

#[tokio::test]
async fn test_failed_firing_is_followed_by_next() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    node.manager
        .register_task(log.failing_task(
            "flaky",
            TaskTiming::repeating(Duration::ZERO, Duration::from_millis(50)),
            Duration::ZERO,
            Some(2),
        ))
        .unwrap();

    node.manager.start().await.unwrap();
    assert!(wait_until(SETTLE_TIMEOUT, || log.count() >= 4).await);
    node.manager.stop().await.unwrap();

    let sequence: Vec<u64> = log.firings().iter().map(|f| f.firing).collect();
    assert_eq!(&sequence[..4], &[1, 2, 3, 4]);

    let info = node.manager.status().task("flaky").cloned().unwrap();
    assert_eq!(info.failure_count, 1);
    assert!(info.fire_count >= 4);
}

#[tokio::test]
async fn test_leader_task_fires_relative_to_acquisition() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    let delay = Duration::from_millis(300);
    node.manager
        .register_leader_task(log.task("leader_job", TaskTiming::one_shot(delay)))
        .unwrap();

    node.manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(log.count(), 0, "must not fire before leadership");

    let acquired_at = Instant::now();
    assert_eq!(node.elector.grant(), 1);
    assert!(wait_until(SETTLE_TIMEOUT, || log.count() == 1).await);

    let firing = &log.firings()[0];
    let after_acquisition = firing.started - acquired_at;
    assert!(after_acquisition >= delay, "fired {:?} after acquisition", after_acquisition);
    assert!(after_acquisition < delay + Duration::from_millis(300));
    assert_eq!(firing.epoch, Some(1));

    node.manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_leader_task_rearmed_on_every_epoch() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    node.manager
        .register_leader_task(log.task(
            "leader_job",
            TaskTiming::one_shot(Duration::from_millis(50)),
        ))
        .unwrap();
    node.manager.start().await.unwrap();

    for epoch in 1..=3 {
        assert_eq!(node.elector.grant(), epoch);
        assert!(wait_until(SETTLE_TIMEOUT, || log.count() == epoch as usize).await);
        node.elector.revoke();
        assert!(wait_until(SETTLE_TIMEOUT, || !node.manager.is_leader()).await);
    }
    node.manager.stop().await.unwrap();

    let epochs: Vec<_> = log.firings().iter().map(|f| f.epoch).collect();
    assert_eq!(epochs, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test]
async fn test_nothing_fires_after_stop() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    node.manager
        .register_task(log.task(
            "local",
            TaskTiming::repeating(Duration::ZERO, Duration::from_millis(200)),
        ))
        .unwrap();
    node.manager
        .register_leader_task(log.task(
            "leader",
            TaskTiming::repeating(Duration::ZERO, Duration::from_millis(200)),
        ))
        .unwrap();

    node.manager.start().await.unwrap();
    node.elector.grant();
    assert!(
        wait_until(SETTLE_TIMEOUT, || log.count_for("local") >= 1 && log.count_for("leader") >= 1)
            .await
    );

    node.manager.stop().await.unwrap();
    let stopped_at = Instant::now();
    let count_at_stop = log.count();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(log.count(), count_at_stop);
    assert!(log.firings().iter().all(|f| f.started < stopped_at));
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_execution() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    node.manager
        .register_task(log.slow_task(
            "long",
            TaskTiming::one_shot(Duration::ZERO),
            Duration::from_millis(300),
        ))
        .unwrap();

    node.manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    node.manager.stop().await.unwrap();

    // The running execution completed rather than being dropped
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_registration_after_stop_is_rejected() {
    let node = manual_node("node-a");
    let log = FiringLog::new();
    node.manager.start().await.unwrap();
    node.manager.stop().await.unwrap();

    let result = node
        .manager
        .register_task(log.task("late", TaskTiming::one_shot(Duration::ZERO)));
    assert!(matches!(result, Err(ScheduleError::Driver(_))));
}
