use std::sync::Arc;

use hagglz_agent::{AgentError, AgentRuntime};
use hagglz_core::audit::TracingAuditSink;
use hagglz_core::config::{AppConfig, ConfigError, LoadOptions};
use hagglz_core::orchestrator::{NegotiationContext, Orchestrator, PreparedExecutor};
use hagglz_db::{
    connect_with_config, migrations, DbPool, SqlNegotiationRepository, SqlStrategyMemory,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Orchestrator,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent capabilities could not be configured: {0}")]
    Agent(#[from] AgentError),
}

#[cfg_attr(not(test), allow(dead_code))]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let settings = config.negotiation_settings()?;
    let runtime = AgentRuntime::from_config(&config.llm, &config.memory)?;
    let context = NegotiationContext {
        memory: Arc::new(
            SqlStrategyMemory::new(db_pool.clone())
                .with_conflict_retries(config.memory.feedback_max_conflict_retries),
        ),
        records: Arc::new(SqlNegotiationRepository::new(db_pool.clone())),
        classifier: runtime.classifier,
        embedder: runtime.embedder,
        specialists: Arc::new(runtime.specialists),
        executor: Arc::new(PreparedExecutor),
        audit: Arc::new(TracingAuditSink),
    };

    Ok(Application { config, db_pool, orchestrator: Orchestrator::new(context, settings) })
}
