//! Integration tests against a real Redis container, covering: happy path,
//! retry-then-succeed, dead-letter-on-exhaustion, crash recovery via the
//! reaper, and rate-limited admission. Requires Docker; run with
//! `cargo test --test queue_integration -- --ignored`.

use queue_core::admission::{Admission, AdmissionController};
use queue_core::job::{Job, Outcome};
use queue_core::keyspace::PriorityMap;
use queue_core::reaper::Reaper;
use queue_core::reservation::{self, ReserveOutcome};
use queue_core::{dlq::DlqManager, producer};
use redis::AsyncCommands;
use std::time::Duration;
use test_utils::TestRedis;

async fn connection_manager(redis: &TestRedis) -> redis::aio::ConnectionManager {
    let client = redis::Client::open(redis.connection_string()).unwrap();
    redis::aio::ConnectionManager::new(client).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn happy_path_reserve_and_complete() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let priorities = PriorityMap::new("itest", &["high", "low"]);

    let job = Job::new("job-1", "high", b"payload".to_vec());
    producer::enqueue(&mut conn, &priorities, &job).await.unwrap();

    let queue = priorities.queue_for("high").unwrap();
    let reserved = match reservation::reserve(
        &mut conn,
        "itest",
        "worker-1",
        queue,
        Duration::from_secs(1),
        Duration::from_secs(5),
    )
    .await
    .unwrap()
    {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {other:?}"),
    };
    assert_eq!(reserved.job().id, "job-1");

    reservation::complete(
        &mut conn,
        "itest",
        "worker-1",
        &priorities,
        3,
        100,
        &reserved,
        Outcome::Success,
    )
    .await
    .unwrap();

    let completed_len: u64 = conn.llen("itest:completed").await.unwrap();
    assert_eq!(completed_len, 1);
    let processing_len: u64 = conn.llen("itest:worker:worker-1:processing").await.unwrap();
    assert_eq!(processing_len, 0);
}

#[tokio::test]
#[ignore]
async fn retryable_outcome_requeues_until_max_retries_then_dead_letters() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let priorities = PriorityMap::new("itest", &["high"]);
    let queue = priorities.queue_for("high").unwrap();

    let job = Job::new("job-retry", "high", b"x".to_vec());
    producer::enqueue(&mut conn, &priorities, &job).await.unwrap();

    // Exhaust a 2-retry budget: attempts 0 and 1 requeue, attempt 2 dead-letters.
    for _ in 0..3 {
        let reserved = match reservation::reserve(
            &mut conn,
            "itest",
            "worker-1",
            queue,
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
        {
            ReserveOutcome::Reserved(r) => r,
            other => panic!("expected a reservation, got {other:?}"),
        };
        reservation::complete(
            &mut conn,
            "itest",
            "worker-1",
            &priorities,
            2,
            100,
            &reserved,
            Outcome::Retryable("transient failure".to_string()),
        )
        .await
        .unwrap();
    }

    let dlq = DlqManager::new("itest");
    let stats = dlq.stats(&mut conn).await.unwrap();
    assert_eq!(stats.count, 1);

    let remaining_in_queue: u64 = conn.llen(queue).await.unwrap();
    assert_eq!(remaining_in_queue, 0);
}

#[tokio::test]
#[ignore]
async fn reaper_recovers_orphaned_processing_list() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let priorities = PriorityMap::new("itest", &["high"]);
    let queue = priorities.queue_for("high").unwrap();

    let job = Job::new("job-orphan", "high", b"x".to_vec());
    producer::enqueue(&mut conn, &priorities, &job).await.unwrap();

    // Reserve with a heartbeat TTL so short it has already expired by the
    // time the reaper looks - simulating a worker that died mid-job.
    reservation::reserve(
        &mut conn,
        "itest",
        "dead-worker",
        queue,
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut reaper = Reaper::new(
        connection_manager(&redis).await,
        "itest",
        priorities.clone(),
        Duration::from_secs(5),
    );
    // Suspect then Dead: the state machine needs two ticks to claim a
    // worker whose heartbeat has lapsed.
    reaper.tick().await.unwrap();
    reaper.tick().await.unwrap();

    let recovered_len: u64 = conn.llen(queue).await.unwrap();
    assert_eq!(recovered_len, 1);
    let processing_len: u64 = conn
        .llen("itest:worker:dead-worker:processing")
        .await
        .unwrap();
    assert_eq!(processing_len, 0);
}

#[tokio::test]
#[ignore]
async fn priority_queues_are_independent_keys() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let priorities = PriorityMap::new("itest", &["high", "low"]);

    producer::enqueue(&mut conn, &priorities, &Job::new("h1", "high", vec![]))
        .await
        .unwrap();
    producer::enqueue(&mut conn, &priorities, &Job::new("l1", "low", vec![]))
        .await
        .unwrap();

    let high_len: u64 = conn.llen(priorities.queue_for("high").unwrap()).await.unwrap();
    let low_len: u64 = conn.llen(priorities.queue_for("low").unwrap()).await.unwrap();
    assert_eq!(high_len, 1);
    assert_eq!(low_len, 1);
}

#[tokio::test]
#[ignore]
async fn admission_controller_denies_once_budget_is_exhausted() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let controller = AdmissionController::new("itest", 2, Duration::from_secs(5));

    assert!(matches!(
        controller.check(&mut conn).await.unwrap(),
        Admission::Allowed
    ));
    assert!(matches!(
        controller.check(&mut conn).await.unwrap(),
        Admission::Allowed
    ));
    assert!(matches!(
        controller.check(&mut conn).await.unwrap(),
        Admission::Denied { .. }
    ));
}

#[tokio::test]
#[ignore]
async fn zero_budget_disables_admission_control() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let controller = AdmissionController::new("itest", 0, Duration::from_secs(5));

    for _ in 0..10 {
        assert!(matches!(
            controller.check(&mut conn).await.unwrap(),
            Admission::Allowed
        ));
    }
}
