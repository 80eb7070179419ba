use std::sync::Arc;

use async_trait::async_trait;

use hagglz_core::domain::classification::{clamp_unit, BillCategory};
use hagglz_core::errors::ApplicationError;
use hagglz_core::router::{CategoryScore, ClassificationCapability};

use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You classify consumer bills for a negotiation service. \
Reply with one line per category in the form `CATEGORY SCORE`, where CATEGORY is one of \
medical, telecom, utility, subscription and SCORE is a number between 0 and 1. \
Do not add any other text.";

/// Classifier backed by a chat-completion model.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClassificationCapability for LlmClassifier {
    fn name(&self) -> &'static str {
        "llm-classifier"
    }

    async fn classify_text(&self, text: &str) -> Result<Vec<CategoryScore>, ApplicationError> {
        let prompt = format!("Bill:\n{text}");
        let reply = self
            .llm
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|error| error.into_application(self.name()))?;

        let scores = parse_scores(&reply);
        if scores.is_empty() {
            tracing::debug!(
                event_name = "agent.classifier.unparsable",
                model = self.llm.model(),
                "classifier reply contained no category scores"
            );
            return Err(ApplicationError::Classification(
                "model reply contained no category scores".to_string(),
            ));
        }
        Ok(scores)
    }
}

/// Reads `category score` pairs, tolerating `:`/`=` separators, list
/// markers and a percent form. Unknown categories are skipped and the last
/// score for a category wins.
pub fn parse_scores(reply: &str) -> Vec<CategoryScore> {
    let mut scores: Vec<CategoryScore> = Vec::new();

    for line in reply.lines() {
        let cleaned: String = line
            .trim_start_matches(|c: char| matches!(c, '-' | '*' | '#') || c.is_whitespace())
            .chars()
            .map(|c| if matches!(c, ':' | '=' | ',' | '`') { ' ' } else { c })
            .collect();
        let mut parts = cleaned.split_whitespace();
        let Some(category) = parts.next().and_then(BillCategory::parse) else {
            continue;
        };
        if category == BillCategory::Unknown {
            continue;
        }
        let Some(confidence) = parts.next().and_then(parse_confidence) else {
            continue;
        };

        scores.retain(|score| score.category != category);
        scores.push(CategoryScore { category, confidence });
    }

    scores
}

fn parse_confidence(raw: &str) -> Option<f64> {
    let (number, percent) = match raw.strip_suffix('%') {
        Some(number) => (number, true),
        None => (raw, false),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(clamp_unit(if percent { value / 100.0 } else { value }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use hagglz_core::domain::classification::BillCategory;
    use hagglz_core::errors::ErrorKind;
    use hagglz_core::router::ClassificationCapability;

    use super::{parse_scores, LlmClassifier};
    use crate::error::AgentError;
    use crate::llm::LlmClient;

    struct CannedLlm(Result<&'static str, u16>);

    #[async_trait]
    impl LlmClient for CannedLlm {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AgentError> {
            match self.0 {
                Ok(reply) => Ok(reply.to_string()),
                Err(status) => Err(AgentError::Status { status, body: String::new() }),
            }
        }
    }

    #[test]
    fn parses_loose_reply_formats() {
        let scores = parse_scores(
            "- utility: 0.92\n* Telecom = 15%\nmedical 0.1\ninsurance 0.4\nnotes follow\nutility 0.95",
        );

        assert_eq!(scores.len(), 3);
        let utility = scores.iter().find(|s| s.category == BillCategory::Utility).expect("utility");
        assert_eq!(utility.confidence, 0.95);
        let telecom = scores.iter().find(|s| s.category == BillCategory::Telecom).expect("telecom");
        assert!((telecom.confidence - 0.15).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let scores = parse_scores("subscription 3.5\nmedical -1");
        assert_eq!(scores[0].confidence, 1.0);
        assert_eq!(scores[1].confidence, 0.0);
    }

    #[tokio::test]
    async fn unparsable_reply_is_classification_error() {
        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Ok("I think it is a bill."))));
        let error = classifier.classify_text("Electric bill").await.expect_err("no scores");
        assert_eq!(error.kind(), ErrorKind::Classification);
    }

    #[tokio::test]
    async fn provider_outage_is_retryable() {
        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Err(503))));
        let error = classifier.classify_text("Electric bill").await.expect_err("outage");
        assert!(error.is_retryable());

        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Ok("utility 0.9"))));
        let scores = classifier.classify_text("Electric bill").await.expect("scores");
        assert_eq!(scores[0].category, BillCategory::Utility);
    }
}
