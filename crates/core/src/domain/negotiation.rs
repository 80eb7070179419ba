use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::bill::Bill;
use crate::domain::classification::ClassificationResult;
use crate::domain::memory::MemoryEntryId;
use crate::domain::strategy::NegotiationStrategy;
use crate::errors::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NegotiationId(pub String);

impl NegotiationId {
    pub fn generate() -> Self {
        Self(format!("NEG-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    Received,
    Classified,
    StrategyGenerated,
    AutoExecuting,
    SupervisedExecuting,
    AwaitingHuman,
    Completed,
    Failed,
}

impl NegotiationState {
    pub const ALL: [NegotiationState; 8] = [
        Self::Received,
        Self::Classified,
        Self::StrategyGenerated,
        Self::AutoExecuting,
        Self::SupervisedExecuting,
        Self::AwaitingHuman,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Classified => "CLASSIFIED",
            Self::StrategyGenerated => "STRATEGY_GENERATED",
            Self::AutoExecuting => "AUTO_EXECUTING",
            Self::SupervisedExecuting => "SUPERVISED_EXECUTING",
            Self::AwaitingHuman => "AWAITING_HUMAN",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Some(Self::Received),
            "CLASSIFIED" => Some(Self::Classified),
            "STRATEGY_GENERATED" => Some(Self::StrategyGenerated),
            "AUTO_EXECUTING" => Some(Self::AutoExecuting),
            "SUPERVISED_EXECUTING" => Some(Self::SupervisedExecuting),
            "AWAITING_HUMAN" => Some(Self::AwaitingHuman),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States the engine leaves on its own without outside input.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal() && *self != Self::AwaitingHuman
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Auto,
    Supervised,
    Handoff,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Supervised => "supervised",
            Self::Handoff => "handoff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "supervised" => Some(Self::Supervised),
            "handoff" => Some(Self::Handoff),
            _ => None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        match self {
            Self::Auto => NegotiationState::AutoExecuting,
            Self::Supervised => NegotiationState::SupervisedExecuting,
            Self::Handoff => NegotiationState::AwaitingHuman,
        }
    }
}

/// User-safe failure description: a kind plus a readable reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub success: bool,
    pub savings_amount: Option<Decimal>,
    /// False when the strategy memory write was deferred.
    pub memory_synced: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub sequence: u32,
    pub from: Option<NegotiationState>,
    pub to: NegotiationState,
    pub event: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInstructions {
    pub mode: ExecutionMode,
    pub headline: String,
    pub next_steps: Vec<String>,
    pub supervision_points: Vec<String>,
}

impl ExecutionInstructions {
    pub fn for_mode(mode: ExecutionMode, strategy: &NegotiationStrategy) -> Self {
        let opening = strategy
            .talking_points
            .first()
            .cloned()
            .unwrap_or_else(|| format!("Open with the {} approach", strategy.approach));

        match mode {
            ExecutionMode::Auto => Self {
                mode,
                headline: "Strategy cleared for automated negotiation".to_string(),
                next_steps: vec![
                    opening,
                    "Work through the remaining talking points in order".to_string(),
                    "Capture the agreed amount and report feedback".to_string(),
                ],
                supervision_points: Vec::new(),
            },
            ExecutionMode::Supervised => Self {
                mode,
                headline: "Strategy requires review before each commitment".to_string(),
                next_steps: vec![
                    "Review the strategy and talking points".to_string(),
                    opening,
                    "Report the outcome once the provider responds".to_string(),
                ],
                supervision_points: vec![
                    "Confirm any offer before accepting".to_string(),
                    "Escalate if the provider asks for account changes".to_string(),
                ],
            },
            ExecutionMode::Handoff => Self {
                mode,
                headline: "Confidence too low for automation; a negotiator must take over"
                    .to_string(),
                next_steps: vec![
                    "Verify the bill category and extracted fields".to_string(),
                    "Decide on an approach and contact the provider".to_string(),
                    "Resolve the negotiation with the final outcome".to_string(),
                ],
                supervision_points: vec!["All actions are manual".to_string()],
            },
        }
    }
}

/// Lifecycle record of one negotiation. Only the orchestrator mutates it,
/// and only through the flow engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: NegotiationId,
    pub bill: Bill,
    pub bill_digest: String,
    pub state: NegotiationState,
    pub classification: Option<ClassificationResult>,
    pub strategy: Option<NegotiationStrategy>,
    pub blended_confidence: Option<f64>,
    pub execution_mode: Option<ExecutionMode>,
    pub instructions: Option<ExecutionInstructions>,
    pub memory_entry_id: Option<MemoryEntryId>,
    pub failure: Option<FailureReason>,
    pub outcome: Option<NegotiationOutcome>,
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn received(id: NegotiationId, bill: Bill) -> Self {
        let now = Utc::now();
        Self {
            id,
            bill_digest: bill.digest(),
            bill,
            state: NegotiationState::Received,
            classification: None,
            strategy: None,
            blended_confidence: None,
            execution_mode: None,
            instructions: None,
            memory_entry_id: None,
            failure: None,
            outcome: None,
            transitions: vec![StateTransition {
                sequence: 0,
                from: None,
                to: NegotiationState::Received,
                event: "submitted".to_string(),
                reason: None,
                occurred_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn push_transition(
        &mut self,
        to: NegotiationState,
        event: &str,
        reason: Option<String>,
    ) {
        let now = Utc::now();
        let sequence = self.transitions.last().map(|last| last.sequence + 1).unwrap_or_default();
        self.transitions.push(StateTransition {
            sequence,
            from: Some(self.state),
            to,
            event: event.to_string(),
            reason,
            occurred_at: now,
        });
        self.state = to;
        self.updated_at = now;
    }
}
