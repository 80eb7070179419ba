use std::sync::Arc;

use hagglz_core::config::{LlmConfig, LlmProvider, MemoryConfig};
use hagglz_core::memory::EmbeddingCapability;
use hagglz_core::router::{ClassificationCapability, KeywordClassifier};
use hagglz_core::specialist::SpecialistRegistry;

use crate::classifier::LlmClassifier;
use crate::embedding::{HashingEmbedder, HttpEmbeddingClient};
use crate::error::AgentError;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::specialists::default_registry;

/// Capabilities the orchestrator is wired with, chosen by `llm.provider`.
pub struct AgentRuntime {
    pub classifier: Arc<dyn ClassificationCapability>,
    pub embedder: Arc<dyn EmbeddingCapability>,
    pub specialists: SpecialistRegistry,
}

impl AgentRuntime {
    pub fn from_config(llm: &LlmConfig, memory: &MemoryConfig) -> Result<Self, AgentError> {
        let specialists = default_registry()?;

        let runtime = match llm.provider {
            LlmProvider::Local => Self {
                classifier: Arc::new(KeywordClassifier),
                embedder: Arc::new(HashingEmbedder::new(memory.embedding_dimensions)?),
                specialists,
            },
            LlmProvider::Http => {
                let client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::from_config(llm)?);
                Self {
                    classifier: Arc::new(LlmClassifier::new(client)),
                    embedder: Arc::new(HttpEmbeddingClient::from_config(
                        llm,
                        memory.embedding_dimensions,
                    )?),
                    specialists,
                }
            }
        };

        tracing::info!(
            event_name = "agent.runtime.ready",
            provider = ?llm.provider,
            classifier = runtime.classifier.name(),
            embedder = runtime.embedder.name(),
            specialists = runtime.specialists.len(),
            "agent capabilities configured"
        );
        Ok(runtime)
    }
}
