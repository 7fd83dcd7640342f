//! JSON-over-HTTP admin surface, served under `/admin/*` alongside the
//! health/metrics routes. Mirrors the handler shape of
//! `stream_worker::health`: one thin handler per operation, state shared
//! via `axum::extract::State`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use queue_core::error::QueueError;
use queue_core::AdminSurface;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AdminHttpState {
    pub conn: ConnectionManager,
    pub surface: Arc<AdminSurface>,
    /// Flips to `true` once the dispatch engine has been spawned. `--role=admin`
    /// one-shot and HTTP-only processes have no dispatcher to wait on and set
    /// this `true` from construction.
    pub dispatcher_ready: Arc<AtomicBool>,
}

impl AdminHttpState {
    /// For `--role=admin` processes, which never run a dispatcher - readiness
    /// depends only on store reachability.
    pub fn without_dispatcher(conn: ConnectionManager, surface: Arc<AdminSurface>) -> Self {
        Self {
            conn,
            surface,
            dispatcher_ready: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// `GET /healthz` - liveness. The process can answer HTTP requests at all;
/// this never touches Redis, since liveness must not depend on a
/// downstream dependency being healthy - only readiness does.
pub async fn healthz_handler() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// `GET /readyz` - ready only once the store is reachable and, for worker
/// processes, the dispatcher has been initialized.
pub async fn readyz_handler(State(state): State<AdminHttpState>) -> impl IntoResponse {
    let mut conn = state.conn.clone();
    let store_ok = database::redis::check_health(&mut conn).await.is_ok();
    let dispatcher_ok = state.dispatcher_ready.load(Ordering::SeqCst);

    if store_ok && dispatcher_ok {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "store_reachable": store_ok,
                "dispatcher_initialized": dispatcher_ok,
            })),
        )
    }
}

/// `GET /metrics` - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    match queue_core::metrics::metrics_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, String::new()),
    }
}

fn error_response(e: QueueError) -> (StatusCode, Json<Value>) {
    let status = match e.exit_code() {
        2 => StatusCode::BAD_REQUEST,
        3 => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error_code": e.exit_code(), "message": e.to_string() })),
    )
}

pub async fn stats_handler(
    State(state): State<AdminHttpState>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    state
        .surface
        .stats(&mut conn)
        .await
        .map(|stats| {
            Json(json!({
                "queues": stats.queues.iter().map(|q| json!({
                    "priority": q.priority,
                    "queue": q.queue,
                    "length": q.length,
                })).collect::<Vec<_>>(),
                "processing_lists": stats.processing_lists,
                "alive_workers": stats.alive_workers,
                "completed_length": stats.completed_length,
                "dlq_count": stats.dlq.count,
                "rate_limit_ttl_secs": stats.rate_limit_ttl_secs,
            }))
        })
        .map_err(error_response)
}

pub async fn stats_keys_handler(
    State(state): State<AdminHttpState>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    state
        .surface
        .stats_keys(&mut conn)
        .await
        .map(|sk| {
            Json(json!({
                "keys": sk.keys.iter().map(|k| json!({
                    "key": k.key,
                    "length": k.length,
                })).collect::<Vec<_>>(),
            }))
        })
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct PeekParams {
    pub priority: String,
    #[serde(default = "default_peek_n")]
    pub n: isize,
}

fn default_peek_n() -> isize {
    10
}

pub async fn peek_handler(
    State(state): State<AdminHttpState>,
    Query(params): Query<PeekParams>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    state
        .surface
        .peek(&mut conn, &params.priority, params.n)
        .await
        .map(|jobs| {
            Json(json!({
                "jobs": jobs.iter().map(|j| json!({
                    "id": j.id,
                    "priority": j.priority,
                    "retry_count": j.retry_count,
                    "last_error": j.last_error,
                })).collect::<Vec<_>>(),
            }))
        })
        .map_err(error_response)
}

pub async fn purge_dlq_handler(
    State(state): State<AdminHttpState>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    state
        .surface
        .purge_dlq(&mut conn)
        .await
        .map(|count| Json(json!({ "purged": count })))
        .map_err(error_response)
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct PurgeAllParams {
    #[serde(default)]
    pub confirm: bool,
}

pub async fn purge_all_handler(
    State(state): State<AdminHttpState>,
    Query(params): Query<PurgeAllParams>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    state
        .surface
        .purge_all(&mut conn, params.confirm)
        .await
        .map(|count| Json(json!({ "deleted": count })))
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct BenchParams {
    #[serde(default = "default_bench_priority")]
    pub priority: String,
    #[serde(default = "default_bench_count")]
    pub count: u64,
    #[serde(default = "default_bench_rate")]
    pub rate: f64,
    #[serde(default = "default_bench_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bench_priority() -> String {
    "default".to_string()
}
fn default_bench_count() -> u64 {
    100
}
fn default_bench_rate() -> f64 {
    50.0
}
fn default_bench_timeout_secs() -> u64 {
    30
}

pub async fn bench_handler(
    State(state): State<AdminHttpState>,
    Query(params): Query<BenchParams>,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let mut conn = state.conn.clone();
    let worker_id = format!("bench-http-{}", uuid::Uuid::new_v4());
    state
        .surface
        .bench(
            &mut conn,
            &worker_id,
            &params.priority,
            params.count,
            params.rate,
            Duration::from_secs(params.timeout_secs),
        )
        .await
        .map(|result| {
            Json(json!({
                "requested": result.requested,
                "completed": result.completed,
                "duration_ms": result.duration.as_millis(),
                "throughput_per_sec": result.throughput_per_sec,
                "p50_ms": result.p50_ms,
                "p95_ms": result.p95_ms,
            }))
        })
        .map_err(error_response)
}

pub fn admin_router(state: AdminHttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/stats", get(stats_handler))
        .route("/admin/stats-keys", get(stats_keys_handler))
        .route("/admin/peek", get(peek_handler))
        .route("/admin/purge-dlq", post(purge_dlq_handler))
        .route("/admin/purge-all", delete(purge_all_handler))
        .route("/admin/bench", post(bench_handler))
        .with_state(state)
}
