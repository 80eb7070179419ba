pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, NegotiationFlow};
pub use states::{NegotiationEvent, TransitionOutcome};
