use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::future::join_all;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;

use stockcast_backend::app;
use stockcast_backend::config::{AppConfig, AppRole};
use stockcast_backend::external::polygon::PolygonProvider;
use stockcast_backend::external::redis_queue::RedisQueueBackend;
use stockcast_backend::jobs::{JobContext, JobRegistry};
use stockcast_backend::logging::{init_logging, LoggingConfig};
use stockcast_backend::services::job_scheduler_service::JobSchedulerService;
use stockcast_backend::services::queue_service::QueueRegistry;
use stockcast_backend::services::rate_limiter::RateLimiter;
use stockcast_backend::services::trading_calendar::TradingCalendar;
use stockcast_backend::services::worker_service::Worker;
use stockcast_backend::store::{JobStore, PgJobStore, PgMarketStore};
use stockcast_backend::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let role = match config.role {
        AppRole::Api => "api",
        AppRole::Worker => "worker",
    };

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env().for_role(role)).map_err(|e| anyhow!("Logging setup failed: {}", e))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let backend = Arc::new(RedisQueueBackend::connect(&config.redis_url).await?);
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queues = Arc::new(QueueRegistry::new(backend, store.clone(), config.queue_default_timeout_secs));
    let jobs = Arc::new(JobRegistry::with_defaults());

    match config.role {
        AppRole::Api => run_api(&config, queues, jobs).await,
        AppRole::Worker => run_workers(&config, pool, queues, jobs).await,
    }
}

async fn run_api(config: &AppConfig, queues: Arc<QueueRegistry>, jobs: Arc<JobRegistry>) -> anyhow::Result<()> {
    let mut scheduler = JobSchedulerService::new(queues.store(), queues.clone(), jobs.clone()).await?;
    scheduler.start().await?;

    let app = app::create_app(AppState::new(queues, jobs));
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Stockcast API running at http://{}/", config.bind_addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    scheduler.stop().await?;
    Ok(())
}

async fn run_workers(
    config: &AppConfig,
    pool: PgPool,
    queues: Arc<QueueRegistry>,
    jobs: Arc<JobRegistry>,
) -> anyhow::Result<()> {
    let api_key = config
        .polygon_api_key
        .clone()
        .ok_or_else(|| anyhow!("POLYGON_API_KEY must be set for workers"))?;
    let limiter = Arc::new(RateLimiter::new(config.worker_concurrency, config.polygon_requests_per_minute));

    let ctx = JobContext {
        store: queues.store(),
        market: Arc::new(PgMarketStore::new(pool)),
        provider: Arc::new(PolygonProvider::new(api_key, limiter)),
        calendar: Arc::new(TradingCalendar::with_holidays(config.market_holidays.clone())),
    };

    let workers: Vec<Worker> = (0..config.worker_concurrency)
        .map(|i| {
            Worker::new(
                &format!("worker-{}", i),
                config.worker_queues.clone(),
                queues.backend(),
                jobs.clone(),
                ctx.clone(),
                Duration::from_millis(config.worker_poll_ms),
            )
        })
        .collect();

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("🛑 Shutdown requested, finishing in-flight tasks");
        let _ = tx.send(true);
    });

    tracing::info!("🚀 Started {} worker(s) on {:?}", workers.len(), config.worker_queues);
    join_all(workers.iter().map(|w| w.run(rx.clone()))).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
