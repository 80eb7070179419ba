use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::classification::BillCategory;
use crate::errors::ApplicationError;
use crate::router::{CategoryScore, ClassificationCapability};

const MEDICAL: &[&str] = &[
    "ambulance", "clinic", "copay", "deductible", "dental", "dentist", "diagnosis", "doctor",
    "healthcare", "hospital", "laboratory", "medical", "patient", "pharmacy", "physician",
    "procedure", "radiology", "surgery", "treatment",
];

const TELECOM: &[&str] = &[
    "broadband", "cable", "cellular", "fiber", "internet", "landline", "mobile", "phone",
    "roaming", "telecom", "wifi", "wireless",
];

const UTILITY: &[&str] = &[
    "electric", "electricity", "energy", "gas", "heating", "kwh", "meter", "power", "sewer",
    "trash", "utilities", "utility", "waste", "water",
];

const SUBSCRIPTION: &[&str] = &[
    "gym", "license", "magazine", "membership", "newspaper", "premium", "renewal", "software",
    "streaming", "subscription",
];

/// Deterministic in-process classifier over category keyword sets.
///
/// Each category scores `(1 - 0.5^(hits + 1)) * hits / total_hits`, where
/// `hits` counts distinct keywords of that category found in the text.
#[derive(Clone, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn keywords(category: BillCategory) -> &'static [&'static str] {
        match category {
            BillCategory::Medical => MEDICAL,
            BillCategory::Telecom => TELECOM,
            BillCategory::Utility => UTILITY,
            BillCategory::Subscription => SUBSCRIPTION,
            BillCategory::Unknown => &[],
        }
    }

    pub fn score(&self, text: &str) -> Vec<CategoryScore> {
        let tokens = tokenize(text);
        let hits: Vec<(BillCategory, usize)> = BillCategory::KNOWN
            .into_iter()
            .map(|category| {
                let count = Self::keywords(category)
                    .iter()
                    .filter(|keyword| tokens.contains(**keyword))
                    .count();
                (category, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();

        let total: usize = hits.iter().map(|(_, count)| count).sum();
        hits.into_iter()
            .map(|(category, count)| {
                let strength = 1.0 - 0.5f64.powi(count as i32 + 1);
                let share = count as f64 / total as f64;
                CategoryScore { category, confidence: strength * share }
            })
            .collect()
    }
}

#[async_trait]
impl ClassificationCapability for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword-classifier"
    }

    async fn classify_text(&self, text: &str) -> Result<Vec<CategoryScore>, ApplicationError> {
        Ok(self.score(text))
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::KeywordClassifier;
    use crate::domain::classification::BillCategory;

    #[test]
    fn electric_bill_scores_strongly_as_utility() {
        let scores = KeywordClassifier.score("Electric bill $150 from Acme Power");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].category, BillCategory::Utility);
        assert!((scores[0].confidence - 0.875).abs() < 1e-12);
    }

    #[test]
    fn mixed_signals_split_confidence_by_share() {
        let scores = KeywordClassifier.score("Hospital parking and phone charges");
        assert_eq!(scores.len(), 2);
        for score in &scores {
            assert!((score.confidence - 0.375).abs() < 1e-12);
        }
    }

    #[test]
    fn keywords_match_whole_tokens_only() {
        assert!(KeywordClassifier.score("Gastropub dinner receipt").is_empty());
        assert!(KeywordClassifier.score("").is_empty());
    }
}
