//! Category playbooks. Each playbook turns bill signals into an approach,
//! a set of talking-point templates and a confidence score; a proven
//! strategy from memory is reused instead when it fits the bill closely.

pub mod medical;
pub mod subscription;
pub mod telecom;
pub mod utility;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tera::{Context, Tera};

use hagglz_core::domain::bill::Bill;
use hagglz_core::domain::classification::{BillCategory, ClassificationResult};
use hagglz_core::domain::memory::ScoredEntry;
use hagglz_core::domain::strategy::NegotiationStrategy;
use hagglz_core::errors::ApplicationError;
use hagglz_core::specialist::{SpecialistCapability, SpecialistRegistry};

use crate::error::AgentError;

pub use medical::MedicalPlaybook;
pub use subscription::SubscriptionPlaybook;
pub use telecom::TelecomPlaybook;
pub use utility::UtilityPlaybook;

const REUSED_CONFIDENCE_CAP: f64 = 0.95;

/// Lowercased view of a bill with the fields a playbook scores on.
#[derive(Clone, Debug)]
pub struct BillFacts {
    text: String,
    tokens: Vec<String>,
    pub company: Option<String>,
    pub amount: Option<Decimal>,
}

impl BillFacts {
    pub fn new(bill: &Bill, classification: &ClassificationResult) -> Self {
        let text = bill.searchable_text().to_lowercase();
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        let company = classification
            .company()
            .map(str::to_string)
            .or_else(|| bill.company.clone())
            .filter(|company| !company.trim().is_empty());
        let amount = bill.amount.or_else(|| classification.amount());

        Self { text, tokens, company, amount }
    }

    /// Single words match as a token prefix ("promo" matches "promotional");
    /// anything with spaces or punctuation matches as a substring.
    pub fn mentions(&self, word: &str) -> bool {
        if word.chars().all(char::is_alphanumeric) {
            self.tokens.iter().any(|token| token.starts_with(word))
        } else {
            self.text.contains(word)
        }
    }

    pub fn mentions_any(&self, words: &[&str]) -> bool {
        words.iter().any(|word| self.mentions(word))
    }

    pub fn count_mentions(&self, words: &[&str]) -> usize {
        words.iter().filter(|word| self.mentions(word)).count()
    }

    pub fn amount_at_least(&self, threshold: i64) -> bool {
        self.amount.is_some_and(|amount| amount >= Decimal::from(threshold))
    }
}

/// What a playbook decided for one bill, before templates are rendered.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybookDraft {
    pub approach: &'static str,
    pub scripts: Vec<&'static str>,
    pub confidence: f64,
}

pub trait Playbook: Send + Sync {
    fn category(&self) -> BillCategory;

    /// Named tera templates, rendered with `company`, `amount` and `category`.
    fn scripts(&self) -> &'static [(&'static str, &'static str)];

    fn draft(&self, facts: &BillFacts) -> PlaybookDraft;
}

/// When a retrieved strategy is trusted enough to reuse verbatim.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReusePolicy {
    pub min_similarity: f64,
    pub min_success_rate: f64,
    pub min_feedback: u32,
}

impl Default for ReusePolicy {
    fn default() -> Self {
        Self { min_similarity: 0.85, min_success_rate: 0.6, min_feedback: 1 }
    }
}

impl ReusePolicy {
    /// Best qualifying hit. Entries recorded for a different company are
    /// never reused.
    pub fn select<'a>(
        &self,
        retrieved: &'a [ScoredEntry],
        company: Option<&str>,
    ) -> Option<&'a ScoredEntry> {
        retrieved.iter().find(|hit| {
            let same_company = match (hit.entry.company.as_deref(), company) {
                (Some(stored), Some(current)) => stored.eq_ignore_ascii_case(current),
                _ => true,
            };
            same_company
                && hit.similarity >= self.min_similarity
                && hit.entry.total_feedback() >= self.min_feedback
                && hit.entry.success_rate() >= self.min_success_rate
        })
    }
}

/// Splits a stored summary back into its approach and numbered points.
pub fn split_summary(summary: &str) -> Option<(String, Vec<String>)> {
    let mut lines = summary.lines();
    let approach = lines.next().map(str::trim).filter(|line| !line.is_empty())?.to_string();
    let points = lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(". ") {
            Some((number, rest)) if number.chars().all(|c| c.is_ascii_digit()) => rest.to_string(),
            _ => line.to_string(),
        })
        .collect();
    Some((approach, points))
}

pub struct PlaybookSpecialist<P> {
    playbook: P,
    templates: Tera,
    reuse: ReusePolicy,
}

impl<P: Playbook> PlaybookSpecialist<P> {
    pub fn new(playbook: P) -> Result<Self, AgentError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(playbook.scripts().iter().copied())?;
        Ok(Self { playbook, templates, reuse: ReusePolicy::default() })
    }

    pub fn with_reuse_policy(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn playbook(&self) -> &P {
        &self.playbook
    }

    fn capability(&self) -> String {
        format!("{}-specialist", self.playbook.category())
    }

    fn render(&self, draft: &PlaybookDraft, facts: &BillFacts) -> Result<Vec<String>, AgentError> {
        let mut context = Context::new();
        context.insert("company", facts.company.as_deref().unwrap_or("your team"));
        context.insert(
            "amount",
            &facts.amount.map(|amount| format!("${:.2}", amount)).unwrap_or_else(|| "current".to_string()),
        );
        context.insert("category", self.playbook.category().as_str());

        draft
            .scripts
            .iter()
            .map(|name| Ok(self.templates.render(name, &context)?.trim().to_string()))
            .collect()
    }
}

#[async_trait]
impl<P: Playbook> SpecialistCapability for PlaybookSpecialist<P> {
    fn category(&self) -> BillCategory {
        self.playbook.category()
    }

    async fn generate_strategy(
        &self,
        bill: &Bill,
        classification: &ClassificationResult,
        retrieved: &[ScoredEntry],
    ) -> Result<NegotiationStrategy, ApplicationError> {
        let facts = BillFacts::new(bill, classification);
        let draft = self.playbook.draft(&facts);

        if let Some(hit) = self.reuse.select(retrieved, facts.company.as_deref()) {
            if let Some((approach, talking_points)) = split_summary(&hit.entry.summary) {
                let proven = hit.entry.success_rate() * hit.similarity;
                let confidence = draft.confidence.max(proven).min(REUSED_CONFIDENCE_CAP);
                tracing::debug!(
                    event_name = "agent.specialist.strategy_reused",
                    category = self.playbook.category().as_str(),
                    memory_entry_id = %hit.entry.id.0,
                    similarity = hit.similarity,
                    confidence,
                    "reusing proven strategy from memory"
                );
                return Ok(NegotiationStrategy::retrieved(
                    hit.entry.id.clone(),
                    self.playbook.category(),
                    approach,
                    talking_points,
                    confidence,
                ));
            }
        }

        let talking_points = self
            .render(&draft, &facts)
            .map_err(|error| error.into_application(&self.capability()))?;
        tracing::debug!(
            event_name = "agent.specialist.strategy_drafted",
            category = self.playbook.category().as_str(),
            approach = draft.approach,
            confidence = draft.confidence,
            "playbook strategy drafted"
        );
        Ok(NegotiationStrategy::generated(
            self.playbook.category(),
            draft.approach,
            talking_points,
            draft.confidence,
        ))
    }
}

/// Registry with a playbook specialist for every known category.
pub fn default_registry() -> Result<SpecialistRegistry, AgentError> {
    Ok(SpecialistRegistry::default()
        .with(PlaybookSpecialist::new(MedicalPlaybook)?)
        .with(PlaybookSpecialist::new(TelecomPlaybook)?)
        .with(PlaybookSpecialist::new(UtilityPlaybook)?)
        .with(PlaybookSpecialist::new(SubscriptionPlaybook)?))
}

#[cfg(test)]
pub(crate) mod test_support {
    use hagglz_core::domain::bill::Bill;
    use hagglz_core::domain::classification::ClassificationResult;
    use hagglz_core::router::{extract_fields, KeywordClassifier};
    use hagglz_core::router::select_category;

    use super::BillFacts;

    pub fn classify(bill: &Bill) -> ClassificationResult {
        let scores = KeywordClassifier.score(&bill.searchable_text());
        let (category, confidence) = select_category(&scores, bill.category_hint);
        ClassificationResult::new(category, confidence, extract_fields(bill))
    }

    pub fn facts(text: &str) -> BillFacts {
        let bill = Bill::from_text(text);
        BillFacts::new(&bill, &classify(&bill))
    }
}

#[cfg(test)]
mod tests {
    use hagglz_core::domain::bill::Bill;
    use hagglz_core::domain::classification::BillCategory;
    use hagglz_core::domain::memory::{ScoredEntry, StrategyMemoryEntry};
    use hagglz_core::domain::strategy::StrategyProvenance;
    use hagglz_core::specialist::SpecialistCapability;

    use super::test_support::{classify, facts};
    use super::{default_registry, split_summary, PlaybookSpecialist, ReusePolicy, UtilityPlaybook};

    fn proven_entry(company: &str, successes: u32, failures: u32) -> StrategyMemoryEntry {
        let mut entry = StrategyMemoryEntry::new(
            vec![1.0, 0.0],
            "loyalty_rate_review\n1. Ask for the loyalty desk\n2. Mention the competitor quote",
            BillCategory::Utility,
            Some(company.to_string()),
        );
        for _ in 0..successes {
            entry.apply_feedback(true);
        }
        for _ in 0..failures {
            entry.apply_feedback(false);
        }
        entry
    }

    #[test]
    fn facts_match_prefixes_and_phrases() {
        let facts = facts("Promotional rate expired on my self-pay account from Acme Power");
        assert!(facts.mentions("promo"));
        assert!(facts.mentions("self-pay"));
        assert!(!facts.mentions("cancel"));
        assert_eq!(facts.count_mentions(&["promo", "expired", "gym"]), 2);
        assert_eq!(facts.company.as_deref(), Some("Acme Power"));
    }

    #[test]
    fn summary_splits_into_approach_and_points() {
        let (approach, points) =
            split_summary("rate_review\n1. First point\n2. Second. With a period").expect("parsed");
        assert_eq!(approach, "rate_review");
        assert_eq!(points, vec!["First point", "Second. With a period"]);
        assert!(split_summary("").is_none());
    }

    #[test]
    fn reuse_requires_similarity_history_and_matching_company() {
        let policy = ReusePolicy::default();
        let proven = ScoredEntry::new(proven_entry("Acme Power", 3, 1), 0.92);
        let untested = ScoredEntry::new(proven_entry("Acme Power", 0, 0), 0.99);
        let distant = ScoredEntry::new(proven_entry("Acme Power", 5, 0), 0.5);
        let other_company = ScoredEntry::new(proven_entry("Contoso Gas", 5, 0), 0.99);

        let hits = vec![untested, distant, other_company, proven.clone()];
        assert_eq!(policy.select(&hits, Some("acme power")), Some(&proven));
        assert!(policy.select(&hits[..3], Some("Acme Power")).is_none());
    }

    #[tokio::test]
    async fn proven_strategy_is_reused_with_its_source() {
        let specialist = PlaybookSpecialist::new(UtilityPlaybook).expect("templates compile");
        let bill = Bill::from_text("Electric bill $150 from Acme Power");
        let classification = classify(&bill);
        let hit = ScoredEntry::new(proven_entry("Acme Power", 4, 0), 0.97);

        let strategy = specialist
            .generate_strategy(&bill, &classification, std::slice::from_ref(&hit))
            .await
            .expect("strategy");

        assert_eq!(strategy.provenance, StrategyProvenance::Retrieved);
        assert_eq!(strategy.source_entry, Some(hit.entry.id.clone()));
        assert_eq!(strategy.approach, "loyalty_rate_review");
        assert_eq!(strategy.talking_points.len(), 2);
        assert!(strategy.confidence >= 0.85 && strategy.confidence <= 0.95);
    }

    #[test]
    fn default_registry_covers_every_known_category() {
        let registry = default_registry().expect("registry builds");
        assert_eq!(registry.categories(), BillCategory::KNOWN.to_vec());
        assert!(registry.resolve(BillCategory::Unknown).is_err());
    }
}
