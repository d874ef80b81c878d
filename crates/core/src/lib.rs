pub mod audit;
pub mod config;
pub mod domain;
pub mod emergency;
pub mod errors;
pub mod flows;
pub mod gate;
pub mod knowledge;
pub mod notification;
pub mod outcome;
pub mod records;
pub mod retry;
pub mod scheduling;
pub mod text;
pub mod tools;

pub use audit::{
    verify_chain, AuditActor, AuditCategory, AuditError, AuditEvent, AuditOutcome, AuditRecorder,
    AuditSink, ChainVerification, InMemoryAuditSink,
};
pub use domain::appointment::{Appointment, AppointmentStatus, ConfirmationId, Readback};
pub use domain::record::{ContactInfo, Coverage, CoverageStatus, Record, RecordId};
pub use domain::session::{AbandonReason, CallState, Session, SessionId, Speaker, Utterance};
pub use domain::slot::{Provider, ProviderId, Slot, SlotId, SlotStatus, VisitType};
pub use emergency::{Classification, EmergencyClassifier, StreamingScanner, EMERGENCY_SCRIPT};
pub use errors::{ApplicationError, CallError, DomainError, InterfaceError};
pub use flows::{CallAction, CallContext, CallEvent, CallFlow, FlowEngine, TransitionOutcome};
pub use gate::{AuthorizedTool, VerificationGate};
pub use knowledge::{KnowledgeAnswer, KnowledgeBase};
pub use notification::{NotificationError, NotificationGateway, NotificationRequest};
pub use outcome::{CallOutcome, OutcomeFacts};
pub use records::{InMemoryRecordLookup, LookupError, RecordLookup, RecordMatch};
pub use retry::{BackoffPolicy, ExternalCallPolicy};
pub use scheduling::{
    AvailabilityStore, BookingReceipt, InMemoryAvailabilityStore, PracticeClock,
    SchedulingOrchestrator, StoreError,
};
pub use tools::{ToolClass, ToolKind, ToolRequest};
