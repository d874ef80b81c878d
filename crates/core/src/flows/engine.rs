use thiserror::Error;
use tracing::warn;

use crate::audit::{AuditActor, AuditCategory, AuditEvent, AuditOutcome, AuditRecorder};
use crate::domain::session::{CallState, SessionId};
use crate::errors::CallError;
use crate::flows::states::{CallAction, CallContext, CallEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> CallState;
    fn transition(
        &self,
        current: CallState,
        event: CallEvent,
        context: &CallContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Inbound phone call lifecycle.
#[derive(Clone, Debug, Default)]
pub struct CallFlow;

impl FlowDefinition for CallFlow {
    fn initial_state(&self) -> CallState {
        CallState::Ringing
    }

    fn transition(
        &self,
        current: CallState,
        event: CallEvent,
        context: &CallContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_call(current, event, context)
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

    pub fn initial_state(&self) -> CallState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: CallState,
        event: CallEvent,
        context: &CallContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    /// Applies a transition only once its audit record is durable. A failed
    /// append returns `AuditWriteFailure` and the caller keeps `current`.
    pub async fn apply_with_audit(
        &self,
        session_id: &SessionId,
        current: CallState,
        event: CallEvent,
        context: &CallContext,
        recorder: &AuditRecorder,
        actor: AuditActor,
    ) -> Result<TransitionOutcome, CallError> {
        match self.apply(current, event, context) {
            Ok(outcome) => {
                let category = if outcome.to == CallState::Emergency {
                    AuditCategory::Emergency
                } else {
                    AuditCategory::Flow
                };
                recorder
                    .record(
                        AuditEvent::new(
                            session_id.clone(),
                            "flow.transition_applied",
                            category,
                            actor,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", outcome.event.as_str()),
                    )
                    .await
                    .map_err(|error| CallError::AuditWriteFailure(error.to_string()))?;
                Ok(outcome)
            }
            Err(transition_error) => {
                let rejected = recorder
                    .record(
                        AuditEvent::new(
                            session_id.clone(),
                            "flow.transition_rejected",
                            AuditCategory::Flow,
                            actor,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("state", current.as_str())
                        .with_metadata("event", event.as_str())
                        .with_metadata("error", transition_error.to_string()),
                    )
                    .await;
                if let Err(error) = rejected {
                    warn!(
                        event_name = "flow.rejection_unaudited",
                        session_id = %session_id,
                        error = %error,
                    );
                }
                Err(transition_error.into())
            }
        }
    }
}

impl Default for FlowEngine<CallFlow> {
    fn default() -> Self {
        Self::new(CallFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("identity verified event in {state:?} without a bound record")]
    RecordNotBound { state: CallState },
    #[error("no booking awaiting readback in {state:?}")]
    NoPendingReadback { state: CallState },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: CallState, event: CallEvent },
}

fn transition_call(
    current: CallState,
    event: CallEvent,
    context: &CallContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use CallAction::{
        CancelInFlight, ConsultOracle, Greet, ReadBackBooking, RecordConfirmation,
        ReleaseDeclinedSlot, SealSession, SpeakEmergencyScript, StopAudio,
        TransferToEmergencyLine, TransferToStaff,
    };
    use CallEvent::{
        AuditFailure, BookingCommitted, BookingConfirmed, BookingDeclined, CallAnswered,
        CallCompleted, CallerHangup, EmergencySignal, IdentityVerified, IdleTimeout,
        TransferRequested, UtteranceReceived, VerificationExhausted,
    };
    use CallState::{
        Abandoned, Completed, Emergency, Greeting, Resolving, Ringing, Routing, Transferred,
        Verified,
    };

    let invalid = || FlowTransitionError::InvalidTransition { state: current, event };

    if current.is_terminal() {
        return Err(invalid());
    }

    let (to, actions) = match (current, event) {
        // Preempts every other rule from any live state.
        (_, EmergencySignal) => (
            Emergency,
            vec![StopAudio, SpeakEmergencyScript, TransferToEmergencyLine, SealSession],
        ),
        (_, CallerHangup) | (_, IdleTimeout) => (Abandoned, vec![CancelInFlight, SealSession]),
        (_, AuditFailure) => (Abandoned, vec![TransferToStaff, SealSession]),
        (_, TransferRequested) => (Transferred, vec![TransferToStaff, SealSession]),
        (Ringing, CallAnswered) => (Greeting, vec![Greet]),
        (Greeting, UtteranceReceived) => (Routing, vec![ConsultOracle]),
        (Routing, UtteranceReceived)
        | (Verified, UtteranceReceived)
        | (Resolving, UtteranceReceived) => (current, vec![ConsultOracle]),
        (Greeting, IdentityVerified) | (Routing, IdentityVerified) => {
            if !context.record_bound {
                return Err(FlowTransitionError::RecordNotBound { state: current });
            }
            (Verified, vec![ConsultOracle])
        }
        (Greeting, VerificationExhausted) | (Routing, VerificationExhausted) => {
            (Transferred, vec![TransferToStaff, SealSession])
        }
        (Verified, BookingCommitted) => {
            if !context.readback_pending {
                return Err(FlowTransitionError::NoPendingReadback { state: current });
            }
            (Resolving, vec![ReadBackBooking])
        }
        (Resolving, BookingConfirmed) => {
            if !context.readback_pending {
                return Err(FlowTransitionError::NoPendingReadback { state: current });
            }
            (Resolving, vec![RecordConfirmation])
        }
        (Resolving, BookingDeclined) => {
            if !context.readback_pending {
                return Err(FlowTransitionError::NoPendingReadback { state: current });
            }
            (Verified, vec![ReleaseDeclinedSlot, ConsultOracle])
        }
        (Routing, CallCompleted) | (Verified, CallCompleted) | (Resolving, CallCompleted) => {
            (Completed, vec![SealSession])
        }
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
