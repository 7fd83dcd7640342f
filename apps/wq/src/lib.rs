//! `wq`: the worker runtime and administrative CLI for the distributed
//! work queue. `--role=worker` runs the dispatch engine,
//! reaper, heartbeat, optional autoscaler and event-hook bus as concurrent
//! tasks inside one process; `--role=admin` either executes a single
//! inspection/destructive command and exits, or binds the HTTP admin
//! surface and blocks until shutdown.

pub mod admin_http;
pub mod cli;
pub mod config;
pub mod handler;

use clap::Parser;
use core_config::{Environment, FromEnv};
use database::redis::RedisConfig;
use eyre::{eyre, Result, WrapErr};
use queue_autoscale::{Autoscaler, AutoscalerConfig, NoLatencyData};
use queue_core::{AdminSurface, Dispatcher, PriorityMap, QueueConfig, Reaper};
use queue_hooks::{DeliveryWorker, FanoutDispatcher, SubscriptionStore};
use serde_json::json;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{AdminCmd, Cli, Role};
use crate::config::FileConfig;
use crate::handler::{EchoHandler, HookEmittingHandler};

pub async fn run() -> Result<ExitCode> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path).wrap_err("failed to load --config file")?,
        None => FileConfig::default(),
    };
    let queue_config =
        config::load_queue_config(&file_config).wrap_err("failed to resolve queue configuration")?;

    if let Err(e) = queue_config.validate() {
        error!(error = %e, "invalid queue configuration");
        return Ok(ExitCode::from(e.exit_code() as u8));
    }

    queue_core::metrics::init_metrics();

    let redis_config = RedisConfig::from_env().wrap_err("failed to load Redis configuration")?;
    info!(url = %redis_config.url, "connecting to Redis");
    let conn = database::redis::connect_from_config_with_retry(redis_config, None)
        .await
        .wrap_err("failed to connect to Redis")?;
    info!("connected to Redis");

    let priorities = PriorityMap::new(&queue_config.prefix, &queue_config.priorities);

    match cli.role {
        Role::Worker => run_worker(cli, queue_config, priorities, conn).await,
        Role::Admin => run_admin(cli, queue_config, priorities, conn).await,
    }
}

async fn run_worker(
    cli: Cli,
    cfg: QueueConfig,
    priorities: PriorityMap,
    conn: redis::aio::ConnectionManager,
) -> Result<ExitCode> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        let _ = signal_shutdown_tx.send(true);
    });

    let handler = Arc::new(HookEmittingHandler::new(
        EchoHandler,
        conn.clone(),
        cfg.prefix.clone(),
        cfg.max_retries,
    ));

    let dispatcher = Dispatcher::new(conn.clone(), cfg.clone(), handler);
    let reaper = Reaper::new(
        conn.clone(),
        cfg.prefix.clone(),
        priorities.clone(),
        cfg.heartbeat_ttl,
    );

    let dispatcher_ready = Arc::new(AtomicBool::new(false));

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(dispatcher.run(shutdown_rx.clone()));
    dispatcher_ready.store(true, Ordering::SeqCst);
    tasks.spawn(reaper.run(cfg.reaper_interval, shutdown_rx.clone()));

    // The heartbeat loop is the one component whose drain signal feeds
    // back into the process-wide shutdown rather than only observing it:
    // three consecutive refresh failures mean this worker can no longer
    // prove liveness to the reaper, so the whole process must stop
    // reserving and drain exactly as it would on SIGTERM.
    let (drain_tx, mut drain_rx) = watch::channel(false);
    let drain_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if drain_rx.changed().await.is_ok() && *drain_rx.borrow() {
            warn!("heartbeat loop signalled drain, initiating worker shutdown");
            let _ = drain_shutdown_tx.send(true);
        }
    });
    tasks.spawn(queue_core::worker::heartbeat_loop(
        conn.clone(),
        cfg.prefix.clone(),
        cfg.worker_id.clone(),
        cfg.heartbeat_ttl,
        cfg.heartbeat_refresh_interval,
        cfg.heartbeat_failure_drain_threshold,
        shutdown_rx.clone(),
        drain_tx,
    ));

    if std::env::var("WQ_AUTOSCALE_ENABLED").ok().as_deref() == Some("true") {
        for priority in cfg.priorities.clone() {
            let autoscaler = Autoscaler::new(
                conn.clone(),
                cfg.prefix.clone(),
                priorities.clone(),
                AutoscalerConfig {
                    priority,
                    tick_interval: Duration::from_secs(10),
                    min_replicas: 1,
                    max_replicas: 20,
                    target_backlog_per_worker: 50,
                    latency_slo: None,
                    scale_up_cooldown: Duration::from_secs(30),
                    scale_down_cooldown: Duration::from_secs(60),
                },
                NoLatencyData,
                1,
            );
            tasks.spawn(autoscaler.run(shutdown_rx.clone()));
        }
    }

    let fanout = FanoutDispatcher::new(conn.clone(), cfg.prefix.clone(), Duration::from_secs(1));
    tasks.spawn(fanout.run(shutdown_rx.clone()));

    let subscriptions = SubscriptionStore::new(cfg.prefix.clone());
    match subscriptions.list(&mut conn.clone()).await {
        Ok(subs) => {
            let http = reqwest::Client::new();
            for subscription in subs {
                let worker = DeliveryWorker::new(
                    conn.clone(),
                    http.clone(),
                    cfg.prefix.clone(),
                    subscription,
                    Duration::from_secs(1),
                );
                tasks.spawn(worker.run(shutdown_rx.clone()));
            }
        }
        Err(e) => warn!(error = %e, "failed to load hook subscriptions, running without hook delivery"),
    }

    let admin_state = admin_http::AdminHttpState {
        conn: conn.clone(),
        surface: Arc::new(AdminSurface::new(
            cfg.prefix.clone(),
            priorities,
            cfg.admission_window,
        )),
        dispatcher_ready,
    };
    let http_port = cli.http_port;
    tasks.spawn(async move {
        if let Err(e) = serve_http(admin_state, http_port).await {
            error!(error = %e, "admin HTTP server exited");
        }
    });

    while tasks.join_next().await.is_some() {}
    info!("worker runtime stopped");
    Ok(ExitCode::SUCCESS)
}

async fn run_admin(
    cli: Cli,
    cfg: QueueConfig,
    priorities: PriorityMap,
    conn: redis::aio::ConnectionManager,
) -> Result<ExitCode> {
    let surface = AdminSurface::new(cfg.prefix.clone(), priorities.clone(), cfg.admission_window);

    let Some(admin_cmd) = cli.admin_cmd else {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = admin_http::AdminHttpState::without_dispatcher(conn.clone(), Arc::new(surface));
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!(error = %e, "error waiting for shutdown signal");
            }
            let _ = shutdown_tx.send(true);
        });
        tokio::select! {
            result = serve_http(state, cli.http_port) => result?,
            _ = shutdown_rx.changed() => info!("admin HTTP server shutting down"),
        }
        return Ok(ExitCode::SUCCESS);
    };

    let mut conn = conn;
    match run_admin_command(admin_cmd, &cli, &surface, &mut conn).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "admin command failed");
            Ok(ExitCode::from(e.exit_code() as u8))
        }
    }
}

async fn run_admin_command(
    cmd: AdminCmd,
    cli: &Cli,
    surface: &AdminSurface,
    conn: &mut redis::aio::ConnectionManager,
) -> Result<serde_json::Value, queue_core::error::QueueError> {
    match cmd {
        AdminCmd::Stats => {
            let stats = surface.stats(conn).await?;
            Ok(json!({
                "queues": stats.queues.iter().map(|q| json!({
                    "priority": q.priority, "queue": q.queue, "length": q.length,
                })).collect::<Vec<_>>(),
                "processing_lists": stats.processing_lists,
                "alive_workers": stats.alive_workers,
                "completed_length": stats.completed_length,
                "dlq_count": stats.dlq.count,
                "rate_limit_ttl_secs": stats.rate_limit_ttl_secs,
            }))
        }
        AdminCmd::StatsKeys => {
            let sk = surface.stats_keys(conn).await?;
            Ok(json!({
                "keys": sk.keys.iter().map(|k| json!({ "key": k.key, "length": k.length })).collect::<Vec<_>>(),
            }))
        }
        AdminCmd::Peek => {
            let priority = cli
                .peek_queue
                .clone()
                .unwrap_or_else(|| "default".to_string());
            let jobs = surface.peek(conn, &priority, cli.peek_n as isize).await?;
            Ok(json!({
                "jobs": jobs.iter().map(|j| json!({
                    "id": j.id, "priority": j.priority, "retry_count": j.retry_count, "last_error": j.last_error,
                })).collect::<Vec<_>>(),
            }))
        }
        AdminCmd::PurgeDlq => {
            let purged = surface.purge_dlq(conn).await?;
            Ok(json!({ "purged": purged }))
        }
        AdminCmd::PurgeAll => {
            let deleted = surface.purge_all(conn, cli.yes).await?;
            Ok(json!({ "deleted": deleted }))
        }
        AdminCmd::Bench => {
            let worker_id = format!("bench-{}", uuid::Uuid::new_v4());
            let result = surface
                .bench(
                    conn,
                    &worker_id,
                    &cli.bench_priority,
                    cli.bench_count,
                    cli.bench_rate,
                    Duration::from_secs(cli.bench_timeout),
                )
                .await?;
            Ok(json!({
                "requested": result.requested,
                "completed": result.completed,
                "duration_ms": result.duration.as_millis(),
                "throughput_per_sec": result.throughput_per_sec,
                "p50_ms": result.p50_ms,
                "p95_ms": result.p95_ms,
            }))
        }
    }
}

async fn serve_http(state: admin_http::AdminHttpState, port: u16) -> Result<()> {
    let app = admin_http::admin_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind admin HTTP server to {addr}"))?;
    info!(port, "admin HTTP server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| eyre!("admin HTTP server failed: {e}"))
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
        _ = terminate => info!("received SIGTERM, initiating shutdown"),
    }

    Ok(())
}
