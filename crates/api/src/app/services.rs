use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use coachgen_ai::{Generator, SimulatedGenerator};
use coachgen_infra::{InMemoryQueueStore, Orchestrator, PostgresQueueStore, QueueStore};

use crate::config::AppConfig;

/// Wire the queue store, generator and orchestrator from configuration.
pub async fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let store = build_store(config).await?;
    let generator: Arc<dyn Generator> =
        Arc::new(SimulatedGenerator::new(config.simulated_generation));

    tracing::info!(
        background = config.background_execution,
        ceiling_secs = config.ceiling.as_secs(),
        max_attempts = config.max_attempts,
        "orchestrator configured"
    );
    Ok(Arc::new(Orchestrator::new(store, generator, config.orchestrator())))
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn QueueStore>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; queue entries live in memory only");
        return Ok(Arc::new(InMemoryQueueStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresQueueStore::new(pool);
    store.migrate().await.context("failed to apply queue migration")?;
    tracing::info!("using Postgres queue store");
    Ok(Arc::new(store))
}
