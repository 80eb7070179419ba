pub mod audit;
pub mod confidence;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod memory;
pub mod orchestrator;
pub mod records;
pub mod reliability;
pub mod router;
pub mod savings;
pub mod specialist;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use confidence::{evaluate, BlendWeights, ConfidenceThresholds};
pub use config::{AppConfig, NegotiationSettings};
pub use domain::bill::Bill;
pub use domain::classification::{BillCategory, ClassificationResult, ExtractedField};
pub use domain::memory::{MemoryEntryId, MemoryStats, ScoredEntry, StrategyMemoryEntry};
pub use domain::negotiation::{
    ExecutionMode, ExecutionRecord, NegotiationId, NegotiationOutcome, NegotiationState,
};
pub use domain::strategy::{NegotiationStrategy, StrategyProvenance};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use memory::{EmbeddingCapability, InMemoryStrategyMemory, StrategyMemory};
pub use orchestrator::{
    EngineStats, NegotiationContext, NegotiationExecutor, Orchestrator, PreparedExecutor,
};
pub use records::{InMemoryNegotiationRepository, NegotiationRepository, NegotiationSummary};
pub use reliability::RetryPolicy;
pub use router::{CategoryScore, ClassificationCapability, KeywordClassifier, Router};
pub use specialist::{GenericTemplate, SpecialistCapability, SpecialistRegistry};
