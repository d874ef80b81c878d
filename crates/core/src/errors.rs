use thiserror::Error;

use crate::domain::session::SessionId;
use crate::domain::slot::{SlotId, VisitType};
use crate::flows::FlowTransitionError;
use crate::tools::ToolKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures surfaced to the conversation layer. Everything except
/// `AuditWriteFailure` is something the agent can react to in speech.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("tool `{}` requires identity verification", tool.name())]
    GateDenied { tool: ToolKind },
    #[error("identity claim matched {candidates} records")]
    AmbiguousIdentity { candidates: usize, attempts_remaining: u32 },
    #[error("identity claim matched no record")]
    NoMatch { attempts_remaining: u32 },
    #[error("identity verification attempts exhausted")]
    VerificationExhausted,
    #[error("slot {slot_id} was claimed by another caller")]
    SlotConflict { slot_id: SlotId },
    #[error("slot {slot_id} does not exist")]
    SlotNotFound { slot_id: SlotId },
    #[error("slot {slot_id} cannot be booked as {requested:?}")]
    VisitTypeMismatch { slot_id: SlotId, requested: VisitType },
    #[error("external call `{operation}` timed out or failed after retry")]
    ExternalTimeout { operation: String },
    #[error("audit write failed: {0}")]
    AuditWriteFailure(String),
    #[error(transparent)]
    InvalidTransition(#[from] FlowTransitionError),
    #[error("session {session_id} is sealed")]
    SessionSealed { session_id: SessionId },
    #[error("session {session_id} was not found")]
    SessionNotFound { session_id: SessionId },
}

impl CallError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::GateDenied { .. } => "identity_not_verified",
            Self::AmbiguousIdentity { .. } => "ambiguous_identity",
            Self::NoMatch { .. } => "no_match",
            Self::VerificationExhausted => "verification_exhausted",
            Self::SlotConflict { .. } => "slot_conflict",
            Self::SlotNotFound { .. } => "slot_not_found",
            Self::VisitTypeMismatch { .. } => "visit_type_mismatch",
            Self::ExternalTimeout { .. } => "external_timeout",
            Self::AuditWriteFailure(_) => "audit_write_failure",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::SessionSealed { .. } => "session_sealed",
            Self::SessionNotFound { .. } => "session_not_found",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GateDenied { .. }
                | Self::AmbiguousIdentity { .. }
                | Self::NoMatch { .. }
                | Self::SlotConflict { .. }
                | Self::SlotNotFound { .. }
                | Self::VisitTypeMismatch { .. }
        )
    }

    /// Caller-safe wording; never includes record data.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::GateDenied { .. } => {
                "I need to verify your identity first. Can I get your full name and date of birth?"
            }
            Self::AmbiguousIdentity { .. } | Self::NoMatch { .. } => {
                "I couldn't find a match for that name and date of birth. Could you spell your name and repeat your date of birth?"
            }
            Self::VerificationExhausted => {
                "I wasn't able to verify your identity. Let me connect you with our staff."
            }
            Self::SlotConflict { .. } | Self::SlotNotFound { .. } => {
                "That time was just taken. Let me check what else is open."
            }
            Self::VisitTypeMismatch { .. } => {
                "That time isn't available for this kind of visit. Let me find another option."
            }
            Self::ExternalTimeout { .. }
            | Self::AuditWriteFailure(_)
            | Self::InvalidTransition(_)
            | Self::SessionSealed { .. }
            | Self::SessionNotFound { .. } => {
                "I'm unable to complete that right now. I'll connect you with our staff."
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested call session does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_)
            | ApplicationError::Call(CallError::InvalidTransition(_))
            | ApplicationError::Call(CallError::SessionSealed { .. }) => Self::BadRequest {
                message: "call state does not allow this request".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Call(CallError::SessionNotFound { session_id }) => Self::NotFound {
                message: format!("session {session_id} not found"),
                correlation_id: unassigned(),
            },
            ApplicationError::Call(error) if error.is_recoverable() => Self::BadRequest {
                message: error.reason_code().to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Call(error) => Self::ServiceUnavailable {
                message: error.reason_code().to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::SessionId;
    use crate::domain::slot::SlotId;
    use crate::errors::{ApplicationError, CallError, DomainError, InterfaceError};
    use crate::tools::ToolKind;

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "appointment already cancelled".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn missing_session_maps_to_not_found() {
        let interface = ApplicationError::from(CallError::SessionNotFound {
            session_id: SessionId("call-9".to_owned()),
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn gate_denial_is_recoverable_and_asks_for_identity() {
        let error = CallError::GateDenied { tool: ToolKind::BookAppointment };

        assert!(error.is_recoverable());
        assert_eq!(error.reason_code(), "identity_not_verified");
        assert!(error.user_message().contains("full name and date of birth"));
        assert!(error.to_string().contains("book_appointment"));
    }

    #[test]
    fn unrecoverable_failures_degrade_to_staff_handoff() {
        let timeout = CallError::ExternalTimeout { operation: "record_lookup".to_owned() };
        let audit = CallError::AuditWriteFailure("disk full".to_owned());

        assert!(!timeout.is_recoverable());
        assert!(!audit.is_recoverable());
        assert!(timeout.user_message().contains("connect you with our staff"));
        assert!(audit.user_message().contains("connect you with our staff"));
        assert!(CallError::SlotConflict { slot_id: SlotId("s-1".to_owned()) }.is_recoverable());
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
