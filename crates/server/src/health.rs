use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use hagglz_core::orchestrator::Orchestrator;
use hagglz_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    orchestrator: Orchestrator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema: HealthCheck,
    pub engine: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, orchestrator: Orchestrator) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, orchestrator })
}

/// Ready only when the schema is current and both stores answer.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let schema = schema_check(&state.db_pool).await;
    let engine = engine_check(&state.orchestrator).await;
    let ready = schema.is_ready() && engine.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        schema,
        engine,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => HealthCheck::ready("database schema is current"),
        Ok(pending) => HealthCheck::degraded(format!("{} migration(s) pending", pending.len())),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn engine_check(orchestrator: &Orchestrator) -> HealthCheck {
    match orchestrator.stats().await {
        Ok(stats) => HealthCheck::ready(format!(
            "{} negotiations on record, {} strategy memory entries",
            stats.negotiations.total, stats.memory.total_entries
        )),
        Err(error) => {
            tracing::warn!(
                event_name = "system.health.engine_degraded",
                error_kind = error.kind().as_str(),
                error = %error,
                "engine stores did not answer the health check"
            );
            HealthCheck::degraded(format!("engine stores unavailable ({})", error.kind().as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use hagglz_agent::AgentRuntime;
    use hagglz_core::audit::InMemoryAuditSink;
    use hagglz_core::config::AppConfig;
    use hagglz_core::orchestrator::{NegotiationContext, Orchestrator, PreparedExecutor};
    use hagglz_db::{
        connect_with_settings, migrations, DbPool, SqlNegotiationRepository, SqlStrategyMemory,
    };

    use crate::health::{health, HealthState};

    fn engine(pool: &DbPool) -> Orchestrator {
        let config = AppConfig::default();
        let runtime =
            AgentRuntime::from_config(&config.llm, &config.memory).expect("local capabilities");
        let context = NegotiationContext {
            memory: Arc::new(SqlStrategyMemory::new(pool.clone())),
            records: Arc::new(SqlNegotiationRepository::new(pool.clone())),
            classifier: runtime.classifier,
            embedder: runtime.embedder,
            specialists: Arc::new(runtime.specialists),
            executor: Arc::new(PreparedExecutor),
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        Orchestrator::new(context, config.negotiation_settings().expect("default settings"))
    }

    async fn check_health(pool: &DbPool) -> (StatusCode, super::HealthResponse) {
        let state = HealthState { db_pool: pool.clone(), orchestrator: engine(pool) };
        let (status, Json(payload)) = health(State(state)).await;
        (status, payload)
    }

    #[tokio::test]
    async fn ready_when_schema_is_current_and_stores_answer() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, payload) = check_health(&pool).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.schema.status, "ready");
        assert!(payload.engine.detail.starts_with("0 negotiations"));
        pool.close().await;
    }

    #[tokio::test]
    async fn degraded_before_migrations_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, payload) = check_health(&pool).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(payload.schema.detail.contains("pending"));
        assert_eq!(payload.engine.status, "degraded");
        pool.close().await;
    }

    #[tokio::test]
    async fn degraded_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, payload) = check_health(&pool).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.schema.status, "degraded");
        assert_eq!(payload.engine.status, "degraded");
    }
}
