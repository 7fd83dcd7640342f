//! Integration test driving a tick against a real Redis backlog, confirming
//! the sampling loop reads the correct queue and feeds it into `decide`.
//! Requires Docker; run with
//! `cargo test --test autoscale_integration -- --ignored`.

use queue_autoscale::{Autoscaler, AutoscalerConfig, NoLatencyData};
use queue_core::keyspace::PriorityMap;
use redis::AsyncCommands;
use std::time::Duration;
use test_utils::TestRedis;

async fn connection_manager(redis: &TestRedis) -> redis::aio::ConnectionManager {
    let client = redis::Client::open(redis.connection_string()).unwrap();
    redis::aio::ConnectionManager::new(client).await.unwrap()
}

fn config() -> AutoscalerConfig {
    AutoscalerConfig {
        priority: "high".to_string(),
        tick_interval: Duration::from_secs(10),
        min_replicas: 1,
        max_replicas: 10,
        target_backlog_per_worker: 5,
        latency_slo: None,
        scale_up_cooldown: Duration::from_secs(0),
        scale_down_cooldown: Duration::from_secs(0),
    }
}

#[tokio::test]
#[ignore]
async fn tick_samples_real_backlog_and_recommends_scale_up() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let priorities = PriorityMap::new("itest", &["high", "low"]);

    let queue = priorities.queue_for("high").unwrap();
    for i in 0..30 {
        let _: u64 = conn.lpush(queue, format!("job-{i}")).await.unwrap();
    }

    let mut autoscaler = Autoscaler::new(
        connection_manager(&redis).await,
        "itest",
        priorities,
        config(),
        NoLatencyData,
        1,
    );

    let event = autoscaler.tick().await.unwrap();
    assert_eq!(event.backlog, 30);
    assert!(event.decision.desired_replicas > 1);
}

#[tokio::test]
#[ignore]
async fn tick_recommends_no_change_on_empty_backlog() {
    let redis = TestRedis::new().await;
    let priorities = PriorityMap::new("itest", &["high", "low"]);

    let mut autoscaler = Autoscaler::new(
        connection_manager(&redis).await,
        "itest",
        priorities,
        config(),
        NoLatencyData,
        1,
    );

    let event = autoscaler.tick().await.unwrap();
    assert_eq!(event.backlog, 0);
    assert_eq!(event.decision.desired_replicas, 1);
}
