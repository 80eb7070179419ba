use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::negotiation::{ExecutionMode, ExecutionRecord, NegotiationState};
use crate::flows::states::{NegotiationEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> NegotiationState;
    fn transition(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// RECEIVED -> CLASSIFIED -> STRATEGY_GENERATED -> {AUTO_EXECUTING |
/// SUPERVISED_EXECUTING | AWAITING_HUMAN} -> {COMPLETED | FAILED}.
#[derive(Clone, Debug, Default)]
pub struct NegotiationFlow;

impl FlowDefinition for NegotiationFlow {
    fn initial_state(&self) -> NegotiationState {
        NegotiationState::Received
    }

    fn transition(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_negotiation(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> NegotiationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    /// Applies `event` to the record, appending to its audit trail on success.
    /// A rejected event leaves the record untouched.
    pub fn apply_to_record<S>(
        &self,
        record: &mut ExecutionRecord,
        event: NegotiationEvent,
        reason: Option<String>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(&record.state, &event);
        match &result {
            Ok(outcome) => {
                record.push_transition(outcome.to, outcome.event.as_str(), reason.clone());
                let mut audit_event = audit
                    .event("flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", outcome.event.as_str());
                if let Some(reason) = reason {
                    audit_event = audit_event.with_metadata("reason", reason);
                }
                sink.emit(audit_event);
                tracing::info!(
                    event_name = "negotiation.state.transition",
                    negotiation_id = %record.id,
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    trigger = outcome.event.as_str(),
                    "negotiation state transition"
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("state", record.state.as_str())
                        .with_metadata("event", event.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<NegotiationFlow> {
    fn default() -> Self {
        Self::new(NegotiationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("negotiation already terminal in state {state:?}; event {event:?} rejected")]
    Terminal { state: NegotiationState, event: NegotiationEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: NegotiationState, event: NegotiationEvent },
}

fn transition_negotiation(
    current: &NegotiationState,
    event: &NegotiationEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use NegotiationEvent::{
        CancelRequested, Classified, ExecutionFailed, ExecutionSucceeded, HumanResolved,
        ModeSelected, StrategyFailed, StrategyGenerated, ValidationFailed,
    };
    use NegotiationState::{
        AutoExecuting, AwaitingHuman, Completed, Failed, Received, StrategyGenerated as Generated,
        SupervisedExecuting,
    };

    if current.is_terminal() {
        return Err(FlowTransitionError::Terminal { state: *current, event: event.clone() });
    }

    let to = match (current, event) {
        (Received, Classified) => NegotiationState::Classified,
        (Received, ValidationFailed) => Failed,
        (NegotiationState::Classified, StrategyGenerated) => Generated,
        (NegotiationState::Classified, StrategyFailed) => Failed,
        (Generated, ModeSelected(ExecutionMode::Auto)) => AutoExecuting,
        (Generated, ModeSelected(ExecutionMode::Supervised)) => SupervisedExecuting,
        (Generated, ModeSelected(ExecutionMode::Handoff)) => AwaitingHuman,
        (AutoExecuting | SupervisedExecuting, ExecutionSucceeded) => Completed,
        (AutoExecuting | SupervisedExecuting, ExecutionFailed) => Failed,
        (AwaitingHuman, HumanResolved { success: true }) => Completed,
        (AwaitingHuman, HumanResolved { success: false }) => Failed,
        (_, CancelRequested) => Failed,
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone() })
}
