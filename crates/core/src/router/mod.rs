//! Router/classifier: validates a bill, picks its category and extracts fields.

pub mod extract;
pub mod keywords;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::bill::Bill;
use crate::domain::classification::{clamp_unit, BillCategory, ClassificationResult};
use crate::errors::ApplicationError;
use crate::reliability::{call_with_retry, RetryPolicy};

pub use extract::extract_fields;
pub use keywords::KeywordClassifier;

/// Bills shorter than this (trimmed, in characters) are rejected.
pub const MIN_BILL_TEXT_CHARS: usize = 10;
/// A category must reach this score to be chosen over `unknown`.
pub const DETECTION_THRESHOLD: f64 = 0.35;
/// Confidence attached to `unknown` classifications.
pub const UNKNOWN_CONFIDENCE: f64 = 0.1;
/// Added to the score of the bill's category hint.
pub const HINT_BONUS: f64 = 0.1;
const TIE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: BillCategory,
    pub confidence: f64,
}

/// Remote or local text classifier. Calls must be idempotent.
#[async_trait]
pub trait ClassificationCapability: Send + Sync {
    fn name(&self) -> &'static str;
    async fn classify_text(&self, text: &str) -> Result<Vec<CategoryScore>, ApplicationError>;
}

pub struct Router {
    classifier: Arc<dyn ClassificationCapability>,
    retry: RetryPolicy,
}

impl Router {
    pub fn new(classifier: Arc<dyn ClassificationCapability>, retry: RetryPolicy) -> Self {
        Self { classifier, retry }
    }

    /// Fails only with `Validation` (unusable text) or `Cancelled`. Classifier
    /// failures degrade to an `unknown` classification.
    pub async fn classify(
        &self,
        bill: &Bill,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ApplicationError> {
        validate_bill_text(&bill.raw_text)?;

        let text = bill.searchable_text();
        let classifier = self.classifier.clone();
        let scores = call_with_retry(&self.retry, cancel, classifier.name(), |_| {
            let classifier = classifier.clone();
            let text = text.clone();
            async move { classifier.classify_text(&text).await }
        })
        .await;

        let scores = match scores {
            Ok(scores) => scores,
            Err(error @ ApplicationError::Cancelled(_)) => return Err(error),
            Err(error) => {
                tracing::warn!(
                    event_name = "router.classification.degraded",
                    classifier = self.classifier.name(),
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "classifier produced no usable result; falling back to unknown"
                );
                Vec::new()
            }
        };

        let (category, confidence) = select_category(&scores, bill.category_hint);
        let fields = extract_fields(bill);
        tracing::debug!(
            event_name = "router.classification.completed",
            category = category.as_str(),
            confidence,
            extracted_fields = fields.len(),
            "bill classified"
        );
        Ok(ClassificationResult::new(category, confidence, fields))
    }
}

pub fn validate_bill_text(text: &str) -> Result<(), ApplicationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ApplicationError::Validation("bill text is empty".to_string()));
    }
    let length = trimmed.chars().count();
    if length < MIN_BILL_TEXT_CHARS {
        return Err(ApplicationError::Validation(format!(
            "bill text has {length} characters; at least {MIN_BILL_TEXT_CHARS} are required"
        )));
    }
    Ok(())
}

/// Highest score wins; equal scores resolve by category precedence. Scores
/// below the detection threshold yield `unknown`.
pub fn select_category(
    scores: &[CategoryScore],
    hint: Option<BillCategory>,
) -> (BillCategory, f64) {
    let mut best_by_category: BTreeMap<BillCategory, f64> = BTreeMap::new();
    for score in scores.iter().filter(|score| score.category != BillCategory::Unknown) {
        let confidence = clamp_unit(score.confidence);
        let slot = best_by_category.entry(score.category).or_insert(0.0);
        *slot = slot.max(confidence);
    }

    if let Some(hint) = hint.filter(|hint| *hint != BillCategory::Unknown) {
        let slot = best_by_category.entry(hint).or_insert(0.0);
        *slot = clamp_unit((*slot + HINT_BONUS).max(DETECTION_THRESHOLD));
    }

    let top = best_by_category.values().copied().fold(0.0f64, f64::max);
    if top < DETECTION_THRESHOLD {
        return (BillCategory::Unknown, UNKNOWN_CONFIDENCE);
    }

    BillCategory::PRECEDENCE
        .into_iter()
        .find_map(|category| {
            best_by_category
                .get(&category)
                .filter(|score| top - **score <= TIE_EPSILON)
                .map(|score| (category, *score))
        })
        .unwrap_or((BillCategory::Unknown, UNKNOWN_CONFIDENCE))
}
