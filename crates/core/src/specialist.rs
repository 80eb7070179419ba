//! Registry of per-category strategy generators with a generic fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::bill::Bill;
use crate::domain::classification::{BillCategory, ClassificationResult};
use crate::domain::memory::ScoredEntry;
use crate::domain::strategy::NegotiationStrategy;
use crate::errors::ApplicationError;

/// Strategy generator for one bill category.
///
/// Implementations may fail with `Provider` for transient faults; the
/// orchestrator retries those. `retrieved` holds the most similar stored
/// strategies for this category, best first, and may be empty.
#[async_trait]
pub trait SpecialistCapability: Send + Sync {
    fn category(&self) -> BillCategory;

    async fn generate_strategy(
        &self,
        bill: &Bill,
        classification: &ClassificationResult,
        retrieved: &[ScoredEntry],
    ) -> Result<NegotiationStrategy, ApplicationError>;
}

#[derive(Default)]
pub struct SpecialistRegistry {
    specialists: HashMap<BillCategory, Arc<dyn SpecialistCapability>>,
    fallback: GenericTemplate,
}

impl SpecialistRegistry {
    pub fn register<S>(&mut self, specialist: S)
    where
        S: SpecialistCapability + 'static,
    {
        self.register_shared(Arc::new(specialist));
    }

    /// Replaces any specialist already registered for the same category.
    pub fn register_shared(&mut self, specialist: Arc<dyn SpecialistCapability>) {
        self.specialists.insert(specialist.category(), specialist);
    }

    pub fn with<S>(mut self, specialist: S) -> Self
    where
        S: SpecialistCapability + 'static,
    {
        self.register(specialist);
        self
    }

    pub fn resolve(
        &self,
        category: BillCategory,
    ) -> Result<Arc<dyn SpecialistCapability>, ApplicationError> {
        self.specialists
            .get(&category)
            .cloned()
            .ok_or(ApplicationError::CapabilityUnavailable(category))
    }

    pub fn fallback_strategy(
        &self,
        bill: &Bill,
        classification: &ClassificationResult,
    ) -> NegotiationStrategy {
        self.fallback.strategy(bill, classification)
    }

    pub fn categories(&self) -> Vec<BillCategory> {
        let mut categories: Vec<_> = self.specialists.keys().copied().collect();
        categories.sort_by_key(BillCategory::precedence_rank);
        categories
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

/// Category-agnostic negotiation plan used when no specialist is registered.
#[derive(Clone, Debug)]
pub struct GenericTemplate {
    pub confidence: f64,
}

impl GenericTemplate {
    pub const APPROACH: &'static str = "generic_negotiation";
    pub const CONFIDENCE: f64 = 0.3;

    pub fn strategy(&self, bill: &Bill, classification: &ClassificationResult) -> NegotiationStrategy {
        let company = classification
            .company()
            .or(bill.company.as_deref())
            .unwrap_or("the provider")
            .to_string();
        let amount = classification.amount().map(|amount| format!(" of ${amount}")).unwrap_or_default();

        let talking_points = vec![
            format!("Ask {company} for an itemised breakdown of the charge{amount}"),
            "Confirm every line item matches services actually received".to_string(),
            "Ask whether a lower rate, discount or promotion is available".to_string(),
            "Request a payment plan or hardship programme if the balance is unaffordable"
                .to_string(),
            "Get any agreed change confirmed in writing".to_string(),
        ];

        NegotiationStrategy::generated(
            classification.category,
            Self::APPROACH,
            talking_points,
            self.confidence,
        )
    }
}

impl Default for GenericTemplate {
    fn default() -> Self {
        Self { confidence: Self::CONFIDENCE }
    }
}
