//! Integration tests against a real Redis container and a local mock
//! webhook receiver, covering the event-hook bus's producer -> fan-out ->
//! delivery pipeline end to end. Requires Docker; run with
//! `cargo test --test hooks_integration -- --ignored`.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use queue_hooks::{Event, EventKind, FanoutDispatcher, RetryPolicy, Subscription, SubscriptionStore};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestRedis;
use tokio::sync::watch;

async fn connection_manager(redis: &TestRedis) -> redis::aio::ConnectionManager {
    let client = redis::Client::open(redis.connection_string()).unwrap();
    redis::aio::ConnectionManager::new(client).await.unwrap()
}

/// A minimal webhook receiver that just counts deliveries.
async fn spawn_receiver() -> (SocketAddr, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let app_counter = counter.clone();

    async fn receive(State(counter): State<Arc<AtomicUsize>>, _body: Json<serde_json::Value>) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    let app: Router = Router::new()
        .route("/hook", post(receive))
        .with_state(app_counter);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, counter)
}

#[tokio::test]
#[ignore]
async fn fanout_dispatcher_matches_subscription_and_enqueues_delivery_task() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;

    let subscriptions = SubscriptionStore::new("itest");
    let subscription = Subscription {
        id: "sub-1".to_string(),
        endpoint_url: "http://127.0.0.1:1/hook".to_string(),
        event_filter: HashSet::from([EventKind::Succeeded]),
        secret: "s3cr3t".to_string(),
        retry_policy: RetryPolicy::default(),
        dead_letter_after: 5,
    };
    subscriptions.put(&mut conn, &subscription).await.unwrap();

    queue_hooks::publish(&mut conn, "itest", &Event::new(EventKind::Succeeded, "job-1"))
        .await
        .unwrap();
    // A non-matching event must not produce a delivery task.
    queue_hooks::publish(&mut conn, "itest", &Event::new(EventKind::Enqueued, "job-2"))
        .await
        .unwrap();

    let mut dispatcher = FanoutDispatcher::new(connection_manager(&redis).await, "itest", Duration::from_secs(1));
    dispatcher.tick().await.unwrap();
    dispatcher.tick().await.unwrap();

    let queue_len: u64 = redis::AsyncCommands::llen(
        &mut conn,
        "itest:hooks:deliver:sub-1",
    )
    .await
    .unwrap();
    assert_eq!(queue_len, 1);
}

#[tokio::test]
#[ignore]
async fn delivery_worker_delivers_signed_payload_to_subscribed_endpoint() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;
    let (addr, counter) = spawn_receiver().await;

    let subscriptions = SubscriptionStore::new("itest");
    let subscription = Subscription {
        id: "sub-http".to_string(),
        endpoint_url: format!("http://{addr}/hook"),
        event_filter: HashSet::new(),
        secret: "s3cr3t".to_string(),
        retry_policy: RetryPolicy::default(),
        dead_letter_after: 5,
    };
    subscriptions.put(&mut conn, &subscription).await.unwrap();

    queue_hooks::publish(&mut conn, "itest", &Event::new(EventKind::Succeeded, "job-1"))
        .await
        .unwrap();

    let mut dispatcher = FanoutDispatcher::new(connection_manager(&redis).await, "itest", Duration::from_secs(1));
    dispatcher.tick().await.unwrap();

    let mut delivery_worker = queue_hooks::DeliveryWorker::new(
        connection_manager(&redis).await,
        reqwest::Client::new(),
        "itest",
        subscription,
        Duration::from_secs(1),
    );
    delivery_worker.tick().await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore]
async fn delivery_worker_dead_letters_after_endpoint_exhausts_retries() {
    let redis = TestRedis::new().await;
    let mut conn = connection_manager(&redis).await;

    let subscription = Subscription {
        id: "sub-dead".to_string(),
        // Nothing listens on this port - every attempt fails.
        endpoint_url: "http://127.0.0.1:1/hook".to_string(),
        event_filter: HashSet::new(),
        secret: "s3cr3t".to_string(),
        retry_policy: RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        },
        dead_letter_after: 2,
    };

    let task = queue_hooks::DeliveryTask {
        event: Event::new(EventKind::Failed, "job-dead"),
        subscription_id: subscription.id.clone(),
        attempt: 0,
    };
    let queue = format!("itest:hooks:deliver:{}", subscription.id);
    let _: u64 = redis::AsyncCommands::lpush(&mut conn, &queue, task.to_json().unwrap())
        .await
        .unwrap();

    let mut worker = queue_hooks::DeliveryWorker::new(
        connection_manager(&redis).await,
        reqwest::Client::new(),
        "itest",
        subscription,
        Duration::from_secs(1),
    );

    // First tick fails and requeues; second tick exhausts the retry budget.
    worker.tick().await.unwrap();
    worker.tick().await.unwrap();

    let dlq_len: u64 = redis::AsyncCommands::llen(&mut conn, "itest:hooks:dlq")
        .await
        .unwrap();
    assert_eq!(dlq_len, 1);
}

#[tokio::test]
#[ignore]
async fn fanout_dispatcher_run_exits_promptly_on_shutdown() {
    let redis = TestRedis::new().await;
    let conn = connection_manager(&redis).await;
    let dispatcher = FanoutDispatcher::new(conn, "itest", Duration::from_millis(50));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(rx));
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("dispatcher did not stop after shutdown signal")
        .unwrap();
}
