//! Negotiation capabilities for the hagglz engine.
//!
//! This crate supplies the pluggable pieces the core orchestrator calls:
//! - `classifier`: chat-model bill classification
//! - `embedding`: local feature-hashing and remote embedding clients
//! - `specialists`: per-category playbooks that draft or reuse strategies
//! - `runtime`: wiring of the above from configuration
//!
//! Models only ever score and phrase. Routing, confidence blending and
//! execution mode selection stay deterministic in `hagglz-core`.

pub mod classifier;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod runtime;
pub mod specialists;

pub use classifier::LlmClassifier;
pub use embedding::{HashingEmbedder, HttpEmbeddingClient};
pub use error::AgentError;
pub use llm::{HttpLlmClient, LlmClient};
pub use runtime::AgentRuntime;
pub use specialists::{default_registry, Playbook, PlaybookSpecialist, ReusePolicy};
