use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::classification::BillCategory;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryEntryId(pub String);

impl MemoryEntryId {
    pub fn generate() -> Self {
        Self(format!("MEM-{}", uuid::Uuid::new_v4()))
    }
}

/// Stored strategy with its embedding and outcome counters.
///
/// Content fields are append-only. `successes`, `failures` and `version`
/// change only through feedback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyMemoryEntry {
    pub id: MemoryEntryId,
    pub embedding: Vec<f32>,
    pub summary: String,
    pub category: BillCategory,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
    pub successes: u32,
    pub failures: u32,
    pub version: u64,
}

impl StrategyMemoryEntry {
    pub fn new(
        embedding: Vec<f32>,
        summary: impl Into<String>,
        category: BillCategory,
        company: Option<String>,
    ) -> Self {
        Self {
            id: MemoryEntryId::generate(),
            embedding,
            summary: summary.into(),
            category,
            company,
            created_at: Utc::now(),
            successes: 0,
            failures: 0,
            version: 0,
        }
    }

    pub fn total_feedback(&self) -> u32 {
        self.successes.saturating_add(self.failures)
    }

    /// `successes / (successes + failures)`, or 0 before any feedback.
    pub fn success_rate(&self) -> f64 {
        match self.total_feedback() {
            0 => 0.0,
            total => f64::from(self.successes) / f64::from(total),
        }
    }

    pub fn apply_feedback(&mut self, success: bool) {
        if success {
            self.successes = self.successes.saturating_add(1);
        } else {
            self.failures = self.failures.saturating_add(1);
        }
        self.version = self.version.saturating_add(1);
    }
}

/// One retrieval hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: StrategyMemoryEntry,
    pub similarity: f64,
    pub rank_score: f64,
}

impl ScoredEntry {
    pub fn new(entry: StrategyMemoryEntry, similarity: f64) -> Self {
        let rank_score = similarity * (1.0 + entry.success_rate());
        Self { entry, similarity, rank_score }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_entries: u64,
    pub total_feedback: u64,
    pub total_successes: u64,
    pub average_success_rate: f64,
}
