//! Worker entrypoint: configuration, schema, registry, liveness endpoint,
//! then the pool.

mod config;
mod health;
mod tasks;

use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use hakobi_core::{TaskRegistry, TokioSpawner, WorkerPoolBuilder};
use hakobi_sqlx::{BackEnd, PgPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("hakobi_worker=info,hakobi_core=info,hakobi_sqlx=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::WorkerConfig::from_env().context("loading configuration")?;

    // Liveness answers before the first broker connection attempt, so an
    // orchestrator can tell "process up" apart from "queue reachable".
    let listener = health::bind(config.port)
        .await
        .context("binding liveness endpoint")?;
    let health = tokio::spawn(async move {
        if let Err(error) = health::serve(listener).await {
            tracing::error!(error = %error, "liveness endpoint failed");
        }
    });

    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    hakobi_sqlx::migrate(&pool).await.context("preparing schema")?;

    let mut registry = TaskRegistry::new();
    tasks::register_all(&mut registry).context("registering tasks")?;
    let registry = Arc::new(registry);
    tracing::info!(
        tasks = registry.len(),
        queues = ?config.queues,
        concurrency = config.concurrency,
        "worker starting"
    );

    let backend = BackEnd::new(pool)
        .queues(config.queues.clone())
        .lease_time(config.lease_time());
    let worker = WorkerPoolBuilder::new(config.poll_interval)
        .concurrent(config.concurrency)
        .time_limit(config.time_limit)
        .job_spawner(TokioSpawner)
        .build(registry, backend)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        });

    worker.run().await;

    health.abort();
    Ok(())
}
