use serde::{Deserialize, Serialize};

use crate::domain::negotiation::{ExecutionMode, NegotiationState};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationEvent {
    Classified,
    ValidationFailed,
    StrategyGenerated,
    StrategyFailed,
    ModeSelected(ExecutionMode),
    ExecutionSucceeded,
    ExecutionFailed,
    HumanResolved { success: bool },
    CancelRequested,
}

impl NegotiationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::ValidationFailed => "validation_failed",
            Self::StrategyGenerated => "strategy_generated",
            Self::StrategyFailed => "strategy_failed",
            Self::ModeSelected(ExecutionMode::Auto) => "mode_selected_auto",
            Self::ModeSelected(ExecutionMode::Supervised) => "mode_selected_supervised",
            Self::ModeSelected(ExecutionMode::Handoff) => "mode_selected_handoff",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::ExecutionFailed => "execution_failed",
            Self::HumanResolved { success: true } => "human_resolved_success",
            Self::HumanResolved { success: false } => "human_resolved_failure",
            Self::CancelRequested => "cancel_requested",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: NegotiationState,
    pub to: NegotiationState,
    pub event: NegotiationEvent,
}
