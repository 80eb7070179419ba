//! Drives one negotiation per bill through the state machine:
//! classification, memory retrieval, strategy generation, confidence gating
//! and execution. Every step is persisted and audited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::confidence::evaluate;
use crate::config::NegotiationSettings;
use crate::domain::bill::Bill;
use crate::domain::classification::ClassificationResult;
use crate::domain::memory::{MemoryEntryId, MemoryStats, ScoredEntry, StrategyMemoryEntry};
use crate::domain::negotiation::{
    ExecutionInstructions, ExecutionMode, ExecutionRecord, FailureReason, NegotiationId,
    NegotiationOutcome, NegotiationState,
};
use crate::domain::strategy::NegotiationStrategy;
use crate::errors::{ApplicationError, DomainError, ErrorKind};
use crate::flows::{FlowEngine, NegotiationEvent, NegotiationFlow};
use crate::memory::{EmbeddingCapability, StrategyMemory};
use crate::records::{NegotiationRepository, NegotiationSummary};
use crate::reliability::call_with_retry;
use crate::router::{ClassificationCapability, Router};
use crate::specialist::SpecialistRegistry;

const ACTOR: &str = "orchestrator";

/// Carries out a strategy once its execution mode is decided.
#[async_trait]
pub trait NegotiationExecutor: Send + Sync {
    async fn execute(
        &self,
        record: &ExecutionRecord,
        mode: ExecutionMode,
    ) -> Result<(), ApplicationError>;
}

/// Hands the prepared instructions back to the caller and reports success.
/// The conversation with the provider happens outside the engine.
#[derive(Clone, Debug, Default)]
pub struct PreparedExecutor;

#[async_trait]
impl NegotiationExecutor for PreparedExecutor {
    async fn execute(
        &self,
        record: &ExecutionRecord,
        mode: ExecutionMode,
    ) -> Result<(), ApplicationError> {
        tracing::info!(
            event_name = "negotiation.execution.prepared",
            negotiation_id = %record.id,
            execution_mode = mode.as_str(),
            steps = record.instructions.as_ref().map_or(0, |i| i.next_steps.len()),
            "execution instructions prepared"
        );
        Ok(())
    }
}

/// Collaborators handed to the orchestrator at construction. The memory
/// handle is opened once per process and shared by every negotiation.
#[derive(Clone)]
pub struct NegotiationContext {
    pub memory: Arc<dyn StrategyMemory>,
    pub records: Arc<dyn NegotiationRepository>,
    pub classifier: Arc<dyn ClassificationCapability>,
    pub embedder: Arc<dyn EmbeddingCapability>,
    pub specialists: Arc<SpecialistRegistry>,
    pub executor: Arc<dyn NegotiationExecutor>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub negotiations: NegotiationSummary,
    pub memory: MemoryStats,
}

#[derive(Clone)]
pub struct Orchestrator {
    context: NegotiationContext,
    router: Arc<Router>,
    flow: Arc<FlowEngine<NegotiationFlow>>,
    settings: Arc<NegotiationSettings>,
    inflight: Arc<Mutex<HashMap<NegotiationId, CancellationToken>>>,
    record_locks: RecordLocks,
}

impl Orchestrator {
    pub fn new(context: NegotiationContext, settings: NegotiationSettings) -> Self {
        let router = Router::new(context.classifier.clone(), settings.retry.clone());
        Self {
            context,
            router: Arc::new(router),
            flow: Arc::new(FlowEngine::default()),
            settings: Arc::new(settings),
            inflight: Arc::default(),
            record_locks: RecordLocks::default(),
        }
    }

    pub fn settings(&self) -> &NegotiationSettings {
        &self.settings
    }

    /// Records the bill as `RECEIVED` and drives it in the background.
    pub async fn submit(&self, bill: Bill) -> Result<NegotiationId, ApplicationError> {
        let (record, cancel) = self.admit(bill).await?;
        let id = record.id.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(record, cancel).await;
        });
        Ok(id)
    }

    /// Same as `submit`, but waits until the negotiation completes, fails or
    /// parks for a human.
    pub async fn run(&self, bill: Bill) -> Result<ExecutionRecord, ApplicationError> {
        let (record, cancel) = self.admit(bill).await?;
        Ok(self.drive(record, cancel).await)
    }

    pub async fn get_status(&self, id: &NegotiationId) -> Result<ExecutionRecord, ApplicationError> {
        self.context.records.find(id).await?.ok_or_else(|| ApplicationError::NotFound(id.clone()))
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ApplicationError> {
        self.context.records.list_for_user(user_id, limit).await
    }

    pub async fn stats(&self) -> Result<EngineStats, ApplicationError> {
        Ok(EngineStats {
            negotiations: self.context.records.summary().await?,
            memory: self.context.memory.stats().await?,
        })
    }

    /// Aborts a running negotiation, or fails one parked for a human.
    /// Running negotiations reach `FAILED` asynchronously. Cancelling a
    /// finished negotiation is a conflict, even while its run is unwinding.
    pub async fn cancel(&self, id: &NegotiationId) -> Result<(), ApplicationError> {
        let _guard = self.record_locks.acquire(id).await;
        let mut record = self.get_status(id).await?;
        if record.is_terminal() {
            return Err(DomainError::InvariantViolation(format!(
                "negotiation {id} already finished as {}",
                record.state.as_str()
            ))
            .into());
        }

        let token = lock(&self.inflight).get(id).cloned();
        if let Some(token) = &token {
            tracing::info!(
                event_name = "negotiation.cancel.requested",
                negotiation_id = %id,
                state = record.state.as_str(),
                "cancelling in-flight negotiation"
            );
            token.cancel();
        }
        let parked = record.state == NegotiationState::AwaitingHuman;
        if token.is_some() && !parked {
            return Ok(());
        }

        let audit = AuditContext::for_negotiation(id, ACTOR);
        let message = if parked {
            "cancelled before a human resolved it"
        } else {
            "cancelled after its run was interrupted"
        };
        record.failure =
            Some(FailureReason { kind: ErrorKind::Cancelled, message: message.to_string() });
        self.apply(&mut record, NegotiationEvent::CancelRequested, Some("cancelled".into()), &audit)?;
        self.context.records.save(&record).await
    }

    /// Resolves a negotiation parked in `AWAITING_HUMAN`.
    pub async fn resolve_handoff(
        &self,
        id: &NegotiationId,
        success: bool,
    ) -> Result<ExecutionRecord, ApplicationError> {
        let _guard = self.record_locks.acquire(id).await;
        let mut record = self.get_status(id).await?;
        let audit = AuditContext::for_negotiation(id, "human");
        self.resolve_parked(&mut record, success, &audit)?;
        self.context.records.save(&record).await?;
        Ok(record)
    }

    /// Applies the final outcome and reinforces the strategy that was used.
    ///
    /// A record still awaiting a human is resolved by its feedback. A memory
    /// write that keeps failing is deferred: the outcome is kept with
    /// `memory_synced = false` and the call still succeeds. Repeating the
    /// same feedback later re-sends the deferred write.
    pub async fn submit_feedback(
        &self,
        id: &NegotiationId,
        success: bool,
        savings_amount: Option<Decimal>,
    ) -> Result<ExecutionRecord, ApplicationError> {
        if savings_amount.is_some_and(|amount| amount < Decimal::ZERO) {
            return Err(ApplicationError::Validation(
                "savings_amount must not be negative".to_string(),
            ));
        }

        let _guard = self.record_locks.acquire(id).await;
        let mut record = self.get_status(id).await?;
        let audit = AuditContext::for_negotiation(id, "feedback");

        if record.state.is_in_flight() {
            return Err(ApplicationError::Validation(format!(
                "negotiation {id} is still {}; feedback is accepted once it has finished",
                record.state.as_str()
            )));
        }
        if let Some(previous) = &record.outcome {
            if previous.memory_synced || previous.success != success {
                return Err(DomainError::InvariantViolation(format!(
                    "feedback already recorded for negotiation {id}"
                ))
                .into());
            }
            return self.resync_feedback(record, &audit).await;
        }
        if record.state == NegotiationState::AwaitingHuman {
            self.resolve_parked(&mut record, success, &audit)?;
        }

        let memory_synced = match &record.memory_entry_id {
            Some(entry_id) => self.reinforce(entry_id, success, &audit).await,
            None => true,
        };

        record.outcome = Some(NegotiationOutcome {
            success,
            savings_amount,
            memory_synced,
            recorded_at: Utc::now(),
        });
        record.updated_at = Utc::now();
        self.context.records.save(&record).await?;

        self.context.audit.emit(
            audit
                .event("feedback.recorded", AuditCategory::Feedback, AuditOutcome::Success)
                .with_metadata("success", success.to_string())
                .with_metadata("memory_synced", memory_synced.to_string()),
        );
        tracing::info!(
            event_name = "negotiation.feedback.recorded",
            negotiation_id = %id,
            success,
            memory_synced,
            "negotiation feedback recorded"
        );
        Ok(record)
    }

    /// Retries the memory write of a stored outcome. The stored outcome,
    /// savings included, stays as first recorded.
    async fn resync_feedback(
        &self,
        mut record: ExecutionRecord,
        audit: &AuditContext,
    ) -> Result<ExecutionRecord, ApplicationError> {
        let Some(success) = record.outcome.as_ref().map(|outcome| outcome.success) else {
            return Ok(record);
        };
        let memory_synced = match &record.memory_entry_id {
            Some(entry_id) => self.reinforce(entry_id, success, audit).await,
            None => true,
        };
        if !memory_synced {
            return Ok(record);
        }

        if let Some(outcome) = record.outcome.as_mut() {
            outcome.memory_synced = true;
        }
        record.updated_at = Utc::now();
        self.context.records.save(&record).await?;

        self.context.audit.emit(
            audit
                .event("feedback.resynced", AuditCategory::Feedback, AuditOutcome::Success)
                .with_metadata("success", success.to_string()),
        );
        tracing::info!(
            event_name = "negotiation.feedback.resynced",
            negotiation_id = %record.id,
            success,
            "deferred feedback written to strategy memory"
        );
        Ok(record)
    }

    async fn admit(
        &self,
        bill: Bill,
    ) -> Result<(ExecutionRecord, CancellationToken), ApplicationError> {
        let record = ExecutionRecord::received(NegotiationId::generate(), bill);
        self.context.records.save(&record).await?;

        let cancel = CancellationToken::new();
        lock(&self.inflight).insert(record.id.clone(), cancel.clone());

        self.context.audit.emit(
            AuditContext::for_negotiation(&record.id, ACTOR)
                .event("negotiation.received", AuditCategory::Ingress, AuditOutcome::Success)
                .with_metadata("bill_digest", record.bill_digest.clone()),
        );
        tracing::info!(
            event_name = "negotiation.received",
            negotiation_id = %record.id,
            user_id = record.bill.user_id.as_deref().unwrap_or(""),
            "negotiation received"
        );
        Ok((record, cancel))
    }

    async fn drive(&self, mut record: ExecutionRecord, cancel: CancellationToken) -> ExecutionRecord {
        let audit = AuditContext::for_negotiation(&record.id, ACTOR);

        if let Err(error) = self.advance(&mut record, &cancel, &audit).await {
            self.fail(&mut record, error, &audit).await;
        }

        let cancelled_while_parked = {
            let mut inflight = lock(&self.inflight);
            inflight.remove(&record.id);
            cancel.is_cancelled() && record.state == NegotiationState::AwaitingHuman
        };
        if cancelled_while_parked {
            // Resolution or cancellation may have finished the stored record
            // since this copy parked.
            let _guard = self.record_locks.acquire(&record.id).await;
            match self.get_status(&record.id).await {
                Ok(stored) if stored.state == NegotiationState::AwaitingHuman => {
                    record = stored;
                    let error = ApplicationError::Cancelled("cancelled while parking".to_string());
                    self.fail(&mut record, error, &audit).await;
                }
                Ok(stored) => record = stored,
                Err(error) => {
                    tracing::warn!(
                        event_name = "negotiation.cancel.reload_failed",
                        negotiation_id = %record.id,
                        error = %error,
                        "could not reload parked negotiation after cancellation"
                    );
                }
            }
        }

        tracing::info!(
            event_name = "negotiation.drive.finished",
            negotiation_id = %record.id,
            state = record.state.as_str(),
            execution_mode = record.execution_mode.map_or("", |mode| mode.as_str()),
            "negotiation reached a resting state"
        );
        record
    }

    async fn advance(
        &self,
        record: &mut ExecutionRecord,
        cancel: &CancellationToken,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let classification = self.router.classify(&record.bill, cancel).await?;
        self.context.audit.emit(
            audit
                .event("classification.completed", AuditCategory::Classification, AuditOutcome::Success)
                .with_metadata("category", classification.category.as_str())
                .with_metadata("confidence", format!("{:.3}", classification.confidence)),
        );
        let reason = format!(
            "{} at {:.3}",
            classification.category.as_str(),
            classification.confidence
        );
        record.classification = Some(classification.clone());
        self.transition(record, NegotiationEvent::Classified, Some(reason), audit).await?;

        let embedding = self.embed(&record.bill, cancel, audit).await?;
        let retrieved = match &embedding {
            Some(embedding) => self.retrieve(embedding, &classification, cancel, audit).await?,
            None => Vec::new(),
        };

        let strategy =
            self.generate_strategy(&record.bill, &classification, &retrieved, cancel, audit).await?;
        let reason = format!("{} ({})", strategy.approach, strategy.provenance.as_str());
        record.strategy = Some(strategy.clone());
        self.transition(record, NegotiationEvent::StrategyGenerated, Some(reason), audit).await?;

        record.memory_entry_id =
            self.remember(&strategy, &classification, embedding, cancel, audit).await?;

        let blended =
            self.settings.weights.blend(classification.confidence, strategy.confidence);
        let mode = evaluate(blended, &self.settings.thresholds);
        record.blended_confidence = Some(blended);
        record.execution_mode = Some(mode);
        record.instructions = Some(ExecutionInstructions::for_mode(mode, &strategy));
        tracing::info!(
            event_name = "negotiation.mode.selected",
            negotiation_id = %record.id,
            category = classification.category.as_str(),
            classification_confidence = classification.confidence,
            strategy_confidence = strategy.confidence,
            blended_confidence = blended,
            execution_mode = mode.as_str(),
            "execution mode selected"
        );
        let reason = format!("blended confidence {blended:.3}");
        self.transition(record, NegotiationEvent::ModeSelected(mode), Some(reason), audit).await?;

        if mode == ExecutionMode::Handoff {
            return Ok(());
        }

        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(ApplicationError::Cancelled("negotiation cancelled during execution".into()))
            }
            result = self.context.executor.execute(record, mode) => result,
        };
        executed?;
        self.transition(record, NegotiationEvent::ExecutionSucceeded, None, audit).await
    }

    /// Embedding failures leave the negotiation without retrieved context.
    async fn embed(
        &self,
        bill: &Bill,
        cancel: &CancellationToken,
        audit: &AuditContext,
    ) -> Result<Option<Vec<f32>>, ApplicationError> {
        let embedder = self.context.embedder.as_ref();
        let text = bill.searchable_text();
        let text = text.as_str();
        let result =
            call_with_retry(&self.settings.retry, cancel, embedder.name(), move |_| {
                embedder.embed(text)
            })
            .await;

        match result {
            Ok(embedding) => Ok(Some(embedding)),
            Err(error @ ApplicationError::Cancelled(_)) => Err(error),
            Err(error) => {
                self.degraded(audit, "memory.embedding_unavailable", AuditCategory::Memory, &error);
                Ok(None)
            }
        }
    }

    async fn retrieve(
        &self,
        embedding: &[f32],
        classification: &ClassificationResult,
        cancel: &CancellationToken,
        audit: &AuditContext,
    ) -> Result<Vec<ScoredEntry>, ApplicationError> {
        let memory = self.context.memory.as_ref();
        let category = Some(classification.category);
        let k = self.settings.retrieval_k;
        let result = call_with_retry(&self.settings.retry, cancel, "strategy-memory", move |_| {
            memory.retrieve_similar(embedding, category, k)
        })
        .await;

        match result {
            Ok(entries) => {
                let entries: Vec<ScoredEntry> = entries.collect();
                tracing::debug!(
                    event_name = "memory.retrieval.completed",
                    category = classification.category.as_str(),
                    hits = entries.len(),
                    "similar strategies retrieved"
                );
                Ok(entries)
            }
            Err(error @ ApplicationError::Cancelled(_)) => Err(error),
            Err(error) => {
                self.degraded(audit, "memory.retrieval_failed", AuditCategory::Memory, &error);
                Ok(Vec::new())
            }
        }
    }

    async fn generate_strategy(
        &self,
        bill: &Bill,
        classification: &ClassificationResult,
        retrieved: &[ScoredEntry],
        cancel: &CancellationToken,
        audit: &AuditContext,
    ) -> Result<NegotiationStrategy, ApplicationError> {
        let specialist = match self.context.specialists.resolve(classification.category) {
            Ok(specialist) => specialist,
            Err(error @ ApplicationError::CapabilityUnavailable(_)) => {
                self.degraded(audit, "strategy.fallback_template", AuditCategory::Strategy, &error);
                return Ok(self.context.specialists.fallback_strategy(bill, classification));
            }
            Err(error) => return Err(error),
        };

        let capability = format!("{}-specialist", classification.category.as_str());
        let specialist = specialist.as_ref();
        let result = call_with_retry(&self.settings.retry, cancel, &capability, move |_| {
            specialist.generate_strategy(bill, classification, retrieved)
        })
        .await;
        let strategy = match result {
            Ok(strategy) => strategy,
            Err(error @ (ApplicationError::Provider { .. } | ApplicationError::Cancelled(_))) => {
                return Err(error)
            }
            Err(error) => {
                self.degraded(audit, "strategy.fallback_template", AuditCategory::Strategy, &error);
                return Ok(self.context.specialists.fallback_strategy(bill, classification));
            }
        };

        self.context.audit.emit(
            audit
                .event("strategy.generated", AuditCategory::Strategy, AuditOutcome::Success)
                .with_metadata("approach", strategy.approach.clone())
                .with_metadata("provenance", strategy.provenance.as_str())
                .with_metadata("retrieved_context", retrieved.len().to_string()),
        );
        Ok(strategy)
    }

    /// Links the record to a memory entry: the source entry of a reused
    /// strategy, or a freshly inserted one. Insert failures are warnings.
    async fn remember(
        &self,
        strategy: &NegotiationStrategy,
        classification: &ClassificationResult,
        embedding: Option<Vec<f32>>,
        cancel: &CancellationToken,
        audit: &AuditContext,
    ) -> Result<Option<MemoryEntryId>, ApplicationError> {
        if let Some(source) = &strategy.source_entry {
            return Ok(Some(source.clone()));
        }
        let Some(embedding) = embedding else {
            return Ok(None);
        };

        let entry = StrategyMemoryEntry::new(
            embedding,
            strategy.summary(),
            classification.category,
            classification.company().map(str::to_string),
        );
        let memory = self.context.memory.as_ref();
        let entry = &entry;
        let result = call_with_retry(&self.settings.retry, cancel, "strategy-memory", move |_| {
            memory.insert(entry.clone())
        })
        .await;

        match result {
            Ok(id) => {
                self.context.audit.emit(
                    audit
                        .event("memory.strategy_persisted", AuditCategory::Memory, AuditOutcome::Success)
                        .with_metadata("entry_id", id.0.clone()),
                );
                Ok(Some(id))
            }
            Err(error @ ApplicationError::Cancelled(_)) => Err(error),
            Err(error) => {
                self.degraded(audit, "memory.persist_failed", AuditCategory::Memory, &error);
                Ok(None)
            }
        }
    }

    async fn reinforce(&self, entry_id: &MemoryEntryId, success: bool, audit: &AuditContext) -> bool {
        let memory = self.context.memory.as_ref();
        let cancel = CancellationToken::new();
        let result = call_with_retry(&self.settings.retry, &cancel, "strategy-memory", move |_| {
            memory.record_feedback(entry_id, success)
        })
        .await;

        match result {
            Ok(()) => true,
            Err(error) => {
                self.degraded(audit, "memory.feedback_deferred", AuditCategory::Feedback, &error);
                false
            }
        }
    }

    fn resolve_parked(
        &self,
        record: &mut ExecutionRecord,
        success: bool,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        if !success {
            record.failure = Some(FailureReason {
                kind: ErrorKind::Domain,
                message: "negotiator reported the negotiation as unsuccessful".to_string(),
            });
        }
        let reason = if success { "resolved by negotiator" } else { "abandoned by negotiator" };
        self.apply(record, NegotiationEvent::HumanResolved { success }, Some(reason.into()), audit)
    }

    async fn fail(&self, record: &mut ExecutionRecord, error: ApplicationError, audit: &AuditContext) {
        if record.is_terminal() {
            return;
        }
        let event = failure_event(record.state, &error);
        let reason = error.failure_reason();
        tracing::warn!(
            event_name = "negotiation.failed",
            negotiation_id = %record.id,
            state = record.state.as_str(),
            error_kind = error.kind().as_str(),
            error = %error,
            "negotiation failed"
        );
        let message = reason.message.clone();
        record.failure = Some(reason);
        if let Err(error) = self.transition(record, event, Some(message), audit).await {
            tracing::error!(
                event_name = "negotiation.fail.rejected",
                negotiation_id = %record.id,
                error = %error,
                "could not move negotiation to FAILED"
            );
        }
    }

    /// Applies and persists one transition. A failed save is logged; the
    /// in-memory record stays authoritative for the rest of the run.
    async fn transition(
        &self,
        record: &mut ExecutionRecord,
        event: NegotiationEvent,
        reason: Option<String>,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        self.apply(record, event, reason, audit)?;
        if let Err(error) = self.context.records.save(record).await {
            tracing::error!(
                event_name = "negotiation.persist.failed",
                negotiation_id = %record.id,
                state = record.state.as_str(),
                error = %error,
                "failed to persist negotiation snapshot"
            );
        }
        Ok(())
    }

    fn apply(
        &self,
        record: &mut ExecutionRecord,
        event: NegotiationEvent,
        reason: Option<String>,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        self.flow
            .apply_to_record(record, event, reason, self.context.audit.as_ref(), audit)
            .map(|_| ())
            .map_err(|error| ApplicationError::Domain(error.into()))
    }

    fn degraded(
        &self,
        audit: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        error: &ApplicationError,
    ) {
        tracing::warn!(
            event_name = event_type,
            negotiation_id = audit.correlation_id.as_str(),
            error_kind = error.kind().as_str(),
            error = %error,
            "continuing in degraded mode"
        );
        self.context.audit.emit(
            audit
                .event(event_type, category, AuditOutcome::Degraded)
                .with_metadata("error_kind", error.kind().as_str()),
        );
    }
}

fn failure_event(state: NegotiationState, error: &ApplicationError) -> NegotiationEvent {
    match (error, state) {
        (ApplicationError::Cancelled(_), _) => NegotiationEvent::CancelRequested,
        (_, NegotiationState::Received) => NegotiationEvent::ValidationFailed,
        (_, NegotiationState::Classified) => NegotiationEvent::StrategyFailed,
        (_, NegotiationState::AutoExecuting | NegotiationState::SupervisedExecuting) => {
            NegotiationEvent::ExecutionFailed
        }
        _ => NegotiationEvent::CancelRequested,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Serializes outside mutations (feedback, resolution, cancellation) per
/// negotiation.
#[derive(Clone, Default)]
struct RecordLocks {
    locks: Arc<Mutex<HashMap<NegotiationId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RecordLocks {
    async fn acquire(&self, id: &NegotiationId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = lock(&self.locks);
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::Notify;

    use super::{lock, NegotiationContext, NegotiationExecutor, Orchestrator, PreparedExecutor};
    use crate::audit::{AuditOutcome, InMemoryAuditSink};
    use crate::config::NegotiationSettings;
    use crate::domain::bill::Bill;
    use crate::domain::classification::{BillCategory, ClassificationResult};
    use crate::domain::memory::{MemoryEntryId, ScoredEntry, StrategyMemoryEntry};
    use crate::domain::negotiation::{
        ExecutionMode, ExecutionRecord, NegotiationId, NegotiationState,
    };
    use crate::domain::strategy::{NegotiationStrategy, StrategyProvenance};
    use crate::errors::{ApplicationError, ErrorKind};
    use crate::memory::{EmbeddingCapability, InMemoryStrategyMemory, StrategyMemory};
    use crate::records::{InMemoryNegotiationRepository, NegotiationRepository, NegotiationSummary};
    use crate::reliability::RetryPolicy;
    use crate::router::KeywordClassifier;
    use crate::specialist::{GenericTemplate, SpecialistCapability, SpecialistRegistry};

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingCapability for FixedEmbedder {
        fn name(&self) -> &'static str {
            "fixed-embedder"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ApplicationError> {
            let digits = text.chars().filter(char::is_ascii_digit).count() as f32;
            Ok(vec![1.0, 0.5, digits.max(1.0)])
        }
    }

    struct FixedSpecialist {
        category: BillCategory,
        confidence: f64,
        calls: AtomicU32,
    }

    impl FixedSpecialist {
        fn new(category: BillCategory, confidence: f64) -> Self {
            Self { category, confidence, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl SpecialistCapability for FixedSpecialist {
        fn category(&self) -> BillCategory {
            self.category
        }

        async fn generate_strategy(
            &self,
            _bill: &Bill,
            classification: &ClassificationResult,
            _retrieved: &[ScoredEntry],
        ) -> Result<NegotiationStrategy, ApplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NegotiationStrategy::generated(
                classification.category,
                "rate_review",
                vec!["Ask for the current promotional rate".to_string()],
                self.confidence,
            ))
        }
    }

    struct SlowSpecialist {
        calls: AtomicU32,
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl SpecialistCapability for SlowSpecialist {
        fn category(&self) -> BillCategory {
            BillCategory::Utility
        }

        async fn generate_strategy(
            &self,
            _bill: &Bill,
            _classification: &ClassificationResult,
            _retrieved: &[ScoredEntry],
        ) -> Result<NegotiationStrategy, ApplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ApplicationError::provider("slow", "unreachable"))
        }
    }

    /// Reuses the best retrieved entry when one exists.
    struct ReusingSpecialist;

    #[async_trait]
    impl SpecialistCapability for ReusingSpecialist {
        fn category(&self) -> BillCategory {
            BillCategory::Utility
        }

        async fn generate_strategy(
            &self,
            _bill: &Bill,
            classification: &ClassificationResult,
            retrieved: &[ScoredEntry],
        ) -> Result<NegotiationStrategy, ApplicationError> {
            Ok(match retrieved.first() {
                Some(hit) => NegotiationStrategy::retrieved(
                    hit.entry.id.clone(),
                    classification.category,
                    "rate_review",
                    vec!["Repeat what worked last time".to_string()],
                    0.95,
                ),
                None => NegotiationStrategy::generated(
                    classification.category,
                    "rate_review",
                    vec!["Ask for the current promotional rate".to_string()],
                    0.9,
                ),
            })
        }
    }

    /// Reports its category as unsupported from inside the call.
    struct UnavailableSpecialist {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SpecialistCapability for UnavailableSpecialist {
        fn category(&self) -> BillCategory {
            BillCategory::Utility
        }

        async fn generate_strategy(
            &self,
            _bill: &Bill,
            _classification: &ClassificationResult,
            _retrieved: &[ScoredEntry],
        ) -> Result<NegotiationStrategy, ApplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ApplicationError::CapabilityUnavailable(BillCategory::Utility))
        }
    }

    /// Stores every snapshot, then holds the first save that parks a
    /// negotiation until the test releases it.
    #[derive(Default)]
    struct GatedRecords {
        inner: InMemoryNegotiationRepository,
        fired: AtomicBool,
        parked: Notify,
        release: Notify,
    }

    #[async_trait]
    impl NegotiationRepository for GatedRecords {
        async fn save(&self, record: &ExecutionRecord) -> Result<(), ApplicationError> {
            self.inner.save(record).await?;
            if record.state == NegotiationState::AwaitingHuman
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                self.parked.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }

        async fn find(&self, id: &NegotiationId) -> Result<Option<ExecutionRecord>, ApplicationError> {
            self.inner.find(id).await
        }

        async fn list_for_user(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<ExecutionRecord>, ApplicationError> {
            self.inner.list_for_user(user_id, limit).await
        }

        async fn summary(&self) -> Result<NegotiationSummary, ApplicationError> {
            self.inner.summary().await
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl NegotiationExecutor for FailingExecutor {
        async fn execute(
            &self,
            _record: &ExecutionRecord,
            _mode: ExecutionMode,
        ) -> Result<(), ApplicationError> {
            Err(ApplicationError::provider("dialer", "line busy"))
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        memory: Arc<InMemoryStrategyMemory>,
        audit: InMemoryAuditSink,
    }

    fn fast_settings() -> NegotiationSettings {
        NegotiationSettings {
            retry: RetryPolicy {
                attempts: 3,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(4),
                call_timeout: Duration::from_millis(50),
            },
            ..NegotiationSettings::default()
        }
    }

    fn harness(specialists: SpecialistRegistry) -> Harness {
        harness_with_executor(specialists, Arc::new(PreparedExecutor))
    }

    fn harness_with_executor(
        specialists: SpecialistRegistry,
        executor: Arc<dyn NegotiationExecutor>,
    ) -> Harness {
        let memory = Arc::new(InMemoryStrategyMemory::new());
        let audit = InMemoryAuditSink::default();
        let context = NegotiationContext {
            memory: memory.clone(),
            records: Arc::new(InMemoryNegotiationRepository::new()),
            classifier: Arc::new(KeywordClassifier),
            embedder: Arc::new(FixedEmbedder),
            specialists: Arc::new(specialists),
            executor,
            audit: Arc::new(audit.clone()),
        };
        Harness { orchestrator: Orchestrator::new(context, fast_settings()), memory, audit }
    }

    fn states(record: &ExecutionRecord) -> Vec<NegotiationState> {
        record.transitions.iter().map(|transition| transition.to).collect()
    }

    /// Same collaborators, with saves routed through `records`.
    fn with_records(h: &Harness, records: Arc<dyn NegotiationRepository>) -> Orchestrator {
        let mut context = h.orchestrator.context.clone();
        context.records = records;
        Orchestrator::new(context, fast_settings())
    }

    async fn wait_for_run_exit(orchestrator: &Orchestrator, id: &NegotiationId) {
        for _ in 0..200 {
            if !lock(&orchestrator.inflight).contains_key(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("negotiation {id} never left the in-flight set");
    }

    async fn wait_for_terminal(orchestrator: &Orchestrator, record: &ExecutionRecord) -> ExecutionRecord {
        for _ in 0..200 {
            let current = orchestrator.get_status(&record.id).await.expect("record exists");
            if current.is_terminal() {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("negotiation {} never reached a terminal state", record.id);
    }

    #[tokio::test]
    async fn scenario_a_confident_utility_bill_completes_automatically() {
        let h = harness(SpecialistRegistry::default().with(FixedSpecialist::new(BillCategory::Utility, 0.9)));

        let record = h
            .orchestrator
            .run(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("run succeeds");

        let classification = record.classification.as_ref().expect("classified");
        assert_eq!(classification.category, BillCategory::Utility);
        assert!(classification.confidence > 0.8);
        assert!(record.blended_confidence.expect("blended") >= 0.8);
        assert_eq!(record.execution_mode, Some(ExecutionMode::Auto));
        assert_eq!(record.state, NegotiationState::Completed);
        assert_eq!(
            states(&record),
            vec![
                NegotiationState::Received,
                NegotiationState::Classified,
                NegotiationState::StrategyGenerated,
                NegotiationState::AutoExecuting,
                NegotiationState::Completed,
            ]
        );
        assert!(record.memory_entry_id.is_some());
        assert_eq!(h.memory.stats().await.expect("stats").total_entries, 1);
    }

    #[tokio::test]
    async fn scenario_b_empty_bill_fails_validation_without_specialist() {
        let specialist = Arc::new(FixedSpecialist::new(BillCategory::Utility, 0.9));
        let mut registry = SpecialistRegistry::default();
        registry.register_shared(specialist.clone());
        let h = harness(registry);

        let record = h.orchestrator.run(Bill::from_text("")).await.expect("run returns a record");

        assert_eq!(record.state, NegotiationState::Failed);
        assert_eq!(record.failure.as_ref().map(|f| f.kind), Some(ErrorKind::Validation));
        assert_eq!(specialist.calls.load(Ordering::SeqCst), 0);
        assert_eq!(states(&record), vec![NegotiationState::Received, NegotiationState::Failed]);
    }

    #[tokio::test]
    async fn scenario_c_mid_confidence_is_supervised() {
        // 0.4 * 0.875 + 0.6 * 0.42 = 0.602
        let h = harness(SpecialistRegistry::default().with(FixedSpecialist::new(BillCategory::Utility, 0.42)));

        let record = h
            .orchestrator
            .run(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("run succeeds");

        let blended = record.blended_confidence.expect("blended");
        assert!((0.5..0.8).contains(&blended), "blended {blended}");
        assert_eq!(record.execution_mode, Some(ExecutionMode::Supervised));
        assert!(states(&record).contains(&NegotiationState::SupervisedExecuting));
        assert_eq!(record.state, NegotiationState::Completed);
        let instructions = record.instructions.expect("instructions");
        assert!(!instructions.supervision_points.is_empty());
    }

    #[tokio::test]
    async fn scenario_d_low_confidence_parks_for_a_human() {
        let h = harness(SpecialistRegistry::default());

        let record = h
            .orchestrator
            .run(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("run succeeds");

        assert_eq!(record.classification.as_ref().map(|c| c.category), Some(BillCategory::Unknown));
        assert!(record.blended_confidence.expect("blended") < 0.5);
        assert_eq!(record.execution_mode, Some(ExecutionMode::Handoff));
        assert_eq!(record.state, NegotiationState::AwaitingHuman);
        assert_eq!(
            record.strategy.as_ref().map(|s| s.approach.as_str()),
            Some(GenericTemplate::APPROACH)
        );
        assert_eq!(h.audit.events_of_type("strategy.fallback_template").len(), 1);

        let stored = h.orchestrator.get_status(&record.id).await.expect("stored");
        assert_eq!(stored.state, NegotiationState::AwaitingHuman);
    }

    #[tokio::test]
    async fn scenario_e_specialist_timeouts_fail_without_persisting() {
        let entered = Arc::new(Notify::new());
        let specialist = Arc::new(SlowSpecialist { calls: AtomicU32::new(0), entered });
        let mut registry = SpecialistRegistry::default();
        registry.register_shared(specialist.clone());
        let h = harness(registry);

        let record = h
            .orchestrator
            .run(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("run returns a record");

        assert_eq!(record.state, NegotiationState::Failed);
        assert_eq!(specialist.calls.load(Ordering::SeqCst), 3);
        let failure = record.failure.expect("failure reason");
        assert_eq!(failure.kind, ErrorKind::Provider);
        assert!(!failure.message.contains("timed out"));
        assert!(record.strategy.is_none());
        assert!(record.memory_entry_id.is_none());
        assert_eq!(h.memory.stats().await.expect("stats").total_entries, 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_strategy_generation() {
        let entered = Arc::new(Notify::new());
        let specialist = Arc::new(SlowSpecialist { calls: AtomicU32::new(0), entered: entered.clone() });
        let mut registry = SpecialistRegistry::default();
        registry.register_shared(specialist);
        let mut settings = fast_settings();
        settings.retry.call_timeout = Duration::from_secs(60);
        let h = harness(registry);
        let orchestrator = Orchestrator::new(h.orchestrator.context.clone(), settings);

        let id = orchestrator
            .submit(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("submitted");
        entered.notified().await;
        orchestrator.cancel(&id).await.expect("cancel accepted");

        let current = orchestrator.get_status(&id).await.expect("stored");
        let record = wait_for_terminal(&orchestrator, &current).await;
        assert_eq!(record.state, NegotiationState::Failed);
        assert_eq!(record.failure.as_ref().map(|f| f.kind), Some(ErrorKind::Cancelled));
        assert_eq!(
            states(&record),
            vec![NegotiationState::Received, NegotiationState::Classified, NegotiationState::Failed]
        );
    }

    #[tokio::test]
    async fn handoff_resolution_then_feedback_reinforces_memory() {
        let h = harness(SpecialistRegistry::default());
        let record = h
            .orchestrator
            .run(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("run succeeds");
        let entry_id = record.memory_entry_id.clone().expect("strategy remembered");

        let resolved = h.orchestrator.resolve_handoff(&record.id, true).await.expect("resolved");
        assert_eq!(resolved.state, NegotiationState::Completed);

        let again = h.orchestrator.resolve_handoff(&record.id, true).await.expect_err("terminal");
        assert_eq!(again.kind(), ErrorKind::Domain);

        let updated = h
            .orchestrator
            .submit_feedback(&record.id, true, Some(Decimal::new(2500, 2)))
            .await
            .expect("feedback accepted");
        let outcome = updated.outcome.expect("outcome");
        assert!(outcome.success && outcome.memory_synced);
        assert_eq!(outcome.savings_amount, Some(Decimal::new(2500, 2)));

        let entry = h.memory.get(&entry_id).await.expect("get").expect("entry exists");
        assert_eq!((entry.successes, entry.failures), (1, 0));
    }

    #[tokio::test]
    async fn feedback_on_parked_negotiation_resolves_it() {
        let h = harness(SpecialistRegistry::default());
        let record = h
            .orchestrator
            .run(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("run succeeds");

        let updated =
            h.orchestrator.submit_feedback(&record.id, false, None).await.expect("feedback");
        assert_eq!(updated.state, NegotiationState::Failed);

        let duplicate =
            h.orchestrator.submit_feedback(&record.id, true, None).await.expect_err("duplicate");
        assert_eq!(duplicate.kind(), ErrorKind::Domain);
    }

    #[tokio::test]
    async fn feedback_validation_and_unknown_ids() {
        let h = harness(SpecialistRegistry::default());
        let missing = crate::domain::negotiation::NegotiationId("NEG-missing".to_string());

        let error = h.orchestrator.get_status(&missing).await.expect_err("unknown id");
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let error = h
            .orchestrator
            .submit_feedback(&missing, true, Some(Decimal::NEGATIVE_ONE))
            .await
            .expect_err("negative savings");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn retrieved_strategy_is_linked_to_its_memory_entry() {
        let h = harness(SpecialistRegistry::default().with(ReusingSpecialist));
        let bill = "Electric bill $150 from Acme Power";

        let first = h.orchestrator.run(Bill::from_text(bill)).await.expect("first run");
        let second = h.orchestrator.run(Bill::from_text(bill)).await.expect("second run");

        let strategy = second.strategy.as_ref().expect("strategy");
        assert_eq!(strategy.provenance, StrategyProvenance::Retrieved);
        assert_eq!(second.memory_entry_id, first.memory_entry_id);
        assert_eq!(h.memory.stats().await.expect("stats").total_entries, 1);
    }

    #[tokio::test]
    async fn execution_failure_moves_record_to_failed() {
        let h = harness_with_executor(
            SpecialistRegistry::default().with(FixedSpecialist::new(BillCategory::Utility, 0.9)),
            Arc::new(FailingExecutor),
        );

        let record = h
            .orchestrator
            .run(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("run returns a record");

        assert_eq!(record.state, NegotiationState::Failed);
        assert_eq!(record.failure.as_ref().map(|f| f.kind), Some(ErrorKind::Provider));
        assert!(states(&record).contains(&NegotiationState::AutoExecuting));
    }

    #[tokio::test]
    async fn identical_inputs_take_identical_paths() {
        let h = harness(SpecialistRegistry::default().with(FixedSpecialist::new(BillCategory::Utility, 0.6)));
        let bill = Bill::from_text("Water and sewer bill $80 from City Utilities");

        let first = h.orchestrator.run(bill.clone()).await.expect("first");
        let second = h.orchestrator.run(bill).await.expect("second");

        assert_eq!(states(&first), states(&second));
        assert_eq!(first.execution_mode, second.execution_mode);
        assert_eq!(first.blended_confidence, second.blended_confidence);
    }

    #[tokio::test]
    async fn submit_returns_immediately_and_stats_reflect_runs() {
        let h = harness(SpecialistRegistry::default().with(FixedSpecialist::new(BillCategory::Utility, 0.9)));

        let id = h
            .orchestrator
            .submit(Bill::from_text("Electric bill $150 from Acme Power").with_user("user-7"))
            .await
            .expect("submitted");
        let snapshot = h.orchestrator.get_status(&id).await.expect("visible immediately");
        let record = wait_for_terminal(&h.orchestrator, &snapshot).await;
        assert_eq!(record.state, NegotiationState::Completed);

        let history = h.orchestrator.list_for_user("user-7", 10).await.expect("history");
        assert_eq!(history.len(), 1);

        let stats = h.orchestrator.stats().await.expect("stats");
        assert_eq!(stats.negotiations.total, 1);
        assert_eq!(stats.negotiations.count(NegotiationState::Completed), 1);
        assert_eq!(stats.memory.total_entries, 1);
        assert!(h
            .audit
            .events()
            .iter()
            .all(|event| event.outcome != AuditOutcome::Rejected));
    }

    #[tokio::test]
    async fn unknown_memory_entry_defers_feedback_write() {
        let h = harness(SpecialistRegistry::default());
        let mut record = h
            .orchestrator
            .run(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("run succeeds");
        record.memory_entry_id = Some(MemoryEntryId("MEM-gone".to_string()));
        h.orchestrator.context.records.save(&record).await.expect("save");

        let updated =
            h.orchestrator.submit_feedback(&record.id, true, None).await.expect("feedback kept");
        assert_eq!(updated.outcome.map(|o| o.memory_synced), Some(false));
        assert_eq!(h.audit.events_of_type("memory.feedback_deferred").len(), 1);
    }

    #[tokio::test]
    async fn specialist_reporting_unavailable_falls_back_to_generic_template() {
        let specialist = Arc::new(UnavailableSpecialist { calls: AtomicU32::new(0) });
        let mut registry = SpecialistRegistry::default();
        registry.register_shared(specialist.clone());
        let h = harness(registry);

        let record = h
            .orchestrator
            .run(Bill::from_text("Electric bill $150 from Acme Power"))
            .await
            .expect("run returns a record");

        assert_ne!(record.state, NegotiationState::Failed);
        assert!(record.failure.is_none());
        assert_eq!(
            record.strategy.as_ref().map(|s| s.approach.as_str()),
            Some(GenericTemplate::APPROACH)
        );
        assert_eq!(specialist.calls.load(Ordering::SeqCst), 1);
        let fallbacks = h.audit.events_of_type("strategy.fallback_template");
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(
            fallbacks[0].metadata.get("error_kind").map(String::as_str),
            Some(ErrorKind::CapabilityUnavailable.as_str())
        );
    }

    #[tokio::test]
    async fn deferred_feedback_is_written_when_resubmitted() {
        let h = harness(SpecialistRegistry::default());
        let mut record = h
            .orchestrator
            .run(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("run succeeds");
        let entry_id = MemoryEntryId("MEM-late".to_string());
        record.memory_entry_id = Some(entry_id.clone());
        h.orchestrator.context.records.save(&record).await.expect("save");

        let deferred = h
            .orchestrator
            .submit_feedback(&record.id, true, Some(Decimal::new(1500, 2)))
            .await
            .expect("feedback kept");
        assert_eq!(deferred.outcome.as_ref().map(|o| o.memory_synced), Some(false));

        let contradicting =
            h.orchestrator.submit_feedback(&record.id, false, None).await.expect_err("mismatch");
        assert_eq!(contradicting.kind(), ErrorKind::Domain);

        let mut entry = StrategyMemoryEntry::new(
            vec![1.0, 0.5, 4.0],
            "generic\n1. Ask for a review",
            BillCategory::Unknown,
            None,
        );
        entry.id = entry_id.clone();
        h.memory.insert(entry).await.expect("entry becomes available");

        let synced =
            h.orchestrator.submit_feedback(&record.id, true, None).await.expect("resync accepted");
        let outcome = synced.outcome.as_ref().expect("outcome");
        assert!(outcome.success && outcome.memory_synced);
        assert_eq!(outcome.savings_amount, Some(Decimal::new(1500, 2)));
        assert_eq!(synced.state, NegotiationState::Completed);

        let stored = h.memory.get(&entry_id).await.expect("get").expect("entry exists");
        assert_eq!((stored.successes, stored.failures), (1, 0));
        assert_eq!(h.audit.events_of_type("feedback.resynced").len(), 1);

        let repeated =
            h.orchestrator.submit_feedback(&record.id, true, None).await.expect_err("already synced");
        assert_eq!(repeated.kind(), ErrorKind::Domain);
        let stored = h.memory.get(&entry_id).await.expect("get").expect("entry exists");
        assert_eq!(stored.successes, 1);
    }

    #[tokio::test]
    async fn cancel_after_resolution_keeps_completed_record() {
        let h = harness(SpecialistRegistry::default());
        let records = Arc::new(GatedRecords::default());
        let orchestrator = with_records(&h, records.clone());

        let id = orchestrator
            .submit(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("submitted");
        records.parked.notified().await;
        assert!(lock(&orchestrator.inflight).contains_key(&id));

        let resolved = orchestrator.resolve_handoff(&id, true).await.expect("resolved");
        assert_eq!(resolved.state, NegotiationState::Completed);

        let error = orchestrator.cancel(&id).await.expect_err("already finished");
        assert_eq!(error.kind(), ErrorKind::Domain);

        records.release.notify_one();
        wait_for_run_exit(&orchestrator, &id).await;

        let stored = orchestrator.get_status(&id).await.expect("stored");
        assert_eq!(stored.state, NegotiationState::Completed);
        assert!(stored.failure.is_none());
        assert_eq!(states(&stored).last(), Some(&NegotiationState::Completed));
        assert!(!states(&stored).contains(&NegotiationState::Failed));
    }

    #[tokio::test]
    async fn cancel_while_parking_fails_the_record_once() {
        let h = harness(SpecialistRegistry::default());
        let records = Arc::new(GatedRecords::default());
        let orchestrator = with_records(&h, records.clone());

        let id = orchestrator
            .submit(Bill::from_text("Invoice number 4411 for assorted items"))
            .await
            .expect("submitted");
        records.parked.notified().await;

        orchestrator.cancel(&id).await.expect("cancel accepted");
        let cancelled = orchestrator.get_status(&id).await.expect("stored");
        assert_eq!(cancelled.state, NegotiationState::Failed);
        assert_eq!(cancelled.failure.as_ref().map(|f| f.kind), Some(ErrorKind::Cancelled));

        let late = orchestrator.resolve_handoff(&id, true).await.expect_err("terminal");
        assert_eq!(late.kind(), ErrorKind::Domain);

        records.release.notify_one();
        wait_for_run_exit(&orchestrator, &id).await;

        let stored = orchestrator.get_status(&id).await.expect("stored");
        assert_eq!(stored.state, NegotiationState::Failed);
        assert_eq!(stored.transitions.len(), cancelled.transitions.len());
        let failed_transitions = h
            .audit
            .events_of_type("flow.transition_applied")
            .into_iter()
            .filter(|event| event.metadata.get("to").map(String::as_str) == Some("FAILED"))
            .count();
        assert_eq!(failed_transitions, 1);
    }
}
