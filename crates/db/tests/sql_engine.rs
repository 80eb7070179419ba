use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use hagglz_core::audit::InMemoryAuditSink;
use hagglz_core::config::NegotiationSettings;
use hagglz_core::domain::bill::Bill;
use hagglz_core::domain::classification::{BillCategory, ClassificationResult};
use hagglz_core::domain::memory::ScoredEntry;
use hagglz_core::domain::negotiation::{ExecutionMode, NegotiationState};
use hagglz_core::domain::strategy::NegotiationStrategy;
use hagglz_core::errors::ApplicationError;
use hagglz_core::memory::{EmbeddingCapability, StrategyMemory};
use hagglz_core::orchestrator::{NegotiationContext, Orchestrator, PreparedExecutor};
use hagglz_core::router::KeywordClassifier;
use hagglz_core::specialist::{SpecialistCapability, SpecialistRegistry};
use hagglz_db::{connect_with_settings, migrations, SqlNegotiationRepository, SqlStrategyMemory};

type EngineTestResult<T = ()> = Result<T, String>;

struct UnitEmbedder;

#[async_trait]
impl EmbeddingCapability for UnitEmbedder {
    fn name(&self) -> &'static str {
        "unit-embedder"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApplicationError> {
        Ok(vec![0.0, 1.0, 0.0])
    }
}

struct UtilitySpecialist;

#[async_trait]
impl SpecialistCapability for UtilitySpecialist {
    fn category(&self) -> BillCategory {
        BillCategory::Utility
    }

    async fn generate_strategy(
        &self,
        _bill: &Bill,
        classification: &ClassificationResult,
        _retrieved: &[ScoredEntry],
    ) -> Result<NegotiationStrategy, ApplicationError> {
        Ok(NegotiationStrategy::generated(
            classification.category,
            "rate_review",
            vec!["Ask for the budget billing rate".to_string()],
            0.9,
        ))
    }
}

#[tokio::test]
async fn sqlite_backed_engine_completes_and_learns() -> EngineTestResult {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("engine.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;

    let memory = Arc::new(SqlStrategyMemory::new(pool.clone()));
    let records = Arc::new(SqlNegotiationRepository::new(pool.clone()));
    let orchestrator = Orchestrator::new(
        NegotiationContext {
            memory: memory.clone(),
            records: records.clone(),
            classifier: Arc::new(KeywordClassifier),
            embedder: Arc::new(UnitEmbedder),
            specialists: Arc::new(SpecialistRegistry::default().with(UtilitySpecialist)),
            executor: Arc::new(PreparedExecutor),
            audit: Arc::new(InMemoryAuditSink::default()),
        },
        NegotiationSettings::default(),
    );

    let record = orchestrator
        .run(Bill::from_text("Electric bill $150 from Acme Power").with_user("user-9"))
        .await
        .map_err(|e| e.to_string())?;
    if record.state != NegotiationState::Completed {
        return Err(format!("expected COMPLETED, got {}", record.state.as_str()));
    }
    if record.execution_mode != Some(ExecutionMode::Auto) {
        return Err(format!("expected auto mode, got {:?}", record.execution_mode));
    }

    let transitions = records.list_transitions(&record.id).await.map_err(|e| e.to_string())?;
    if transitions.len() != record.transitions.len() {
        return Err(format!(
            "stored {} transitions, record has {}",
            transitions.len(),
            record.transitions.len()
        ));
    }

    let updated = orchestrator
        .submit_feedback(&record.id, true, Some(Decimal::new(3000, 2)))
        .await
        .map_err(|e| e.to_string())?;
    if updated.outcome.map(|o| o.memory_synced) != Some(true) {
        return Err("feedback should reach strategy memory".to_string());
    }

    let entry_id = record.memory_entry_id.ok_or("strategy should be remembered")?;
    let entry = memory
        .get(&entry_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("memory entry should exist")?;
    if (entry.successes, entry.failures) != (1, 0) {
        return Err(format!("unexpected counters {}/{}", entry.successes, entry.failures));
    }

    let stats = orchestrator.stats().await.map_err(|e| e.to_string())?;
    if stats.negotiations.total_savings != Decimal::new(3000, 2) {
        return Err(format!("unexpected savings {}", stats.negotiations.total_savings));
    }

    pool.close().await;
    Ok(())
}
