use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::classification::{clamp_unit, BillCategory};
use crate::domain::memory::MemoryEntryId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub String);

impl StrategyId {
    pub fn generate() -> Self {
        Self(format!("STR-{}", uuid::Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyProvenance {
    Generated,
    Retrieved,
}

impl StrategyProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Retrieved => "retrieved",
        }
    }
}

/// A strategy is never edited; a revision is a new strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiationStrategy {
    pub id: StrategyId,
    pub category: BillCategory,
    pub approach: String,
    pub talking_points: Vec<String>,
    pub confidence: f64,
    pub provenance: StrategyProvenance,
    /// Memory entry this strategy was taken from, for `retrieved` strategies.
    pub source_entry: Option<MemoryEntryId>,
    pub created_at: DateTime<Utc>,
}

impl NegotiationStrategy {
    pub fn generated(
        category: BillCategory,
        approach: impl Into<String>,
        talking_points: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: StrategyId::generate(),
            category,
            approach: approach.into(),
            talking_points,
            confidence: clamp_unit(confidence),
            provenance: StrategyProvenance::Generated,
            source_entry: None,
            created_at: Utc::now(),
        }
    }

    pub fn retrieved(
        source_entry: MemoryEntryId,
        category: BillCategory,
        approach: impl Into<String>,
        talking_points: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            provenance: StrategyProvenance::Retrieved,
            source_entry: Some(source_entry),
            ..Self::generated(category, approach, talking_points, confidence)
        }
    }

    /// Text stored in strategy memory for this strategy.
    pub fn summary(&self) -> String {
        let mut summary = self.approach.clone();
        for (index, point) in self.talking_points.iter().enumerate() {
            summary.push_str(&format!("\n{}. {}", index + 1, point));
        }
        summary
    }
}
