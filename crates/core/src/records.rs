//! Storage port for execution records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::negotiation::{ExecutionRecord, NegotiationId, NegotiationState};
use crate::errors::ApplicationError;

#[async_trait]
pub trait NegotiationRepository: Send + Sync {
    /// Upserts the snapshot. Stored transitions are never rewritten.
    async fn save(&self, record: &ExecutionRecord) -> Result<(), ApplicationError>;
    async fn find(&self, id: &NegotiationId) -> Result<Option<ExecutionRecord>, ApplicationError>;
    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ApplicationError>;
    async fn summary(&self) -> Result<NegotiationSummary, ApplicationError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSummary {
    pub total: u64,
    pub by_state: BTreeMap<String, u64>,
    pub outcomes_recorded: u64,
    pub successful_outcomes: u64,
    pub success_rate: f64,
    pub total_savings: Decimal,
}

impl NegotiationSummary {
    /// Zero counters for every known state.
    pub fn empty() -> Self {
        let mut summary = Self::default();
        for state in NegotiationState::ALL {
            summary.by_state.insert(state.as_str().to_string(), 0);
        }
        summary
    }

    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut summary = Self::empty();
        for record in records {
            summary.add_state(record.state.as_str(), 1);
            if let Some(outcome) = &record.outcome {
                summary.add_outcomes(1, u64::from(outcome.success));
                if let Some(savings) = outcome.savings_amount {
                    summary.total_savings += savings;
                }
            }
        }
        summary
    }

    pub fn add_state(&mut self, state: &str, count: u64) {
        self.total += count;
        *self.by_state.entry(state.to_string()).or_default() += count;
    }

    /// Adds recorded outcomes and keeps `success_rate` in step.
    pub fn add_outcomes(&mut self, recorded: u64, successful: u64) {
        self.outcomes_recorded += recorded;
        self.successful_outcomes += successful;
        if self.outcomes_recorded > 0 {
            self.success_rate = self.successful_outcomes as f64 / self.outcomes_recorded as f64;
        }
    }

    pub fn count(&self, state: NegotiationState) -> u64 {
        self.by_state.get(state.as_str()).copied().unwrap_or_default()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNegotiationRepository {
    records: Arc<RwLock<HashMap<NegotiationId, ExecutionRecord>>>,
}

impl InMemoryNegotiationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NegotiationRepository for InMemoryNegotiationRepository {
    async fn save(&self, record: &ExecutionRecord) -> Result<(), ApplicationError> {
        self.records.write().await.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, id: &NegotiationId) -> Result<Option<ExecutionRecord>, ApplicationError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ApplicationError> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.bill.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        records.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn summary(&self) -> Result<NegotiationSummary, ApplicationError> {
        Ok(NegotiationSummary::from_records(self.records.read().await.values()))
    }
}
