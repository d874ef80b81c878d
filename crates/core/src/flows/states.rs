use serde::{Deserialize, Serialize};

use crate::domain::session::CallState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEvent {
    CallAnswered,
    UtteranceReceived,
    IdentityVerified,
    VerificationExhausted,
    BookingCommitted,
    BookingConfirmed,
    BookingDeclined,
    CallCompleted,
    TransferRequested,
    CallerHangup,
    IdleTimeout,
    AuditFailure,
    EmergencySignal,
}

impl CallEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallAnswered => "call_answered",
            Self::UtteranceReceived => "utterance_received",
            Self::IdentityVerified => "identity_verified",
            Self::VerificationExhausted => "verification_exhausted",
            Self::BookingCommitted => "booking_committed",
            Self::BookingConfirmed => "booking_confirmed",
            Self::BookingDeclined => "booking_declined",
            Self::CallCompleted => "call_completed",
            Self::TransferRequested => "transfer_requested",
            Self::CallerHangup => "caller_hangup",
            Self::IdleTimeout => "idle_timeout",
            Self::AuditFailure => "audit_failure",
            Self::EmergencySignal => "emergency_signal",
        }
    }
}

/// Session facts a transition may depend on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CallContext {
    pub record_bound: bool,
    pub readback_pending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    Greet,
    ConsultOracle,
    ReadBackBooking,
    RecordConfirmation,
    ReleaseDeclinedSlot,
    StopAudio,
    SpeakEmergencyScript,
    TransferToEmergencyLine,
    TransferToStaff,
    CancelInFlight,
    SealSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: CallState,
    pub to: CallState,
    pub event: CallEvent,
    pub actions: Vec<CallAction>,
}

impl TransitionOutcome {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}
