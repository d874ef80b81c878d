use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::appointment::{Appointment, ConfirmationId};
use crate::domain::record::RecordId;
use crate::domain::slot::ProviderId;
use crate::errors::CallError;
use crate::outcome::CallOutcome;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Greeting,
    Routing,
    Verified,
    Resolving,
    Completed,
    Transferred,
    Abandoned,
    Emergency,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Greeting => "greeting",
            Self::Routing => "routing",
            Self::Verified => "verified",
            Self::Resolving => "resolving",
            Self::Completed => "completed",
            Self::Transferred => "transferred",
            Self::Abandoned => "abandoned",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ringing" => Some(Self::Ringing),
            "greeting" => Some(Self::Greeting),
            "routing" => Some(Self::Routing),
            "verified" => Some(Self::Verified),
            "resolving" => Some(Self::Resolving),
            "completed" => Some(Self::Completed),
            "transferred" => Some(Self::Transferred),
            "abandoned" => Some(Self::Abandoned),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }

    /// Emergency is absorbing, so it counts as terminal too.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Transferred | Self::Abandoned | Self::Emergency)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Agent,
    System,
}

/// Tool invocation attached to a transcript line. Arguments and results are
/// stored already redacted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub result: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
    pub tool_call: Option<ToolCallRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    CallerHangup,
    IdleTimeout,
    AuditFailure,
}

impl AbandonReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallerHangup => "caller_hangup",
            Self::IdleTimeout => "idle_timeout",
            Self::AuditFailure => "audit_failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "caller_hangup" => Some(Self::CallerHangup),
            "idle_timeout" => Some(Self::IdleTimeout),
            "audit_failure" => Some(Self::AuditFailure),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub provider_id: ProviderId,
    pub state: CallState,
    pub verified_record: Option<RecordId>,
    pub outcome: Option<CallOutcome>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transcript: Vec<Utterance>,
    pub verification_failures: u32,
    pub pending_readback: Option<Appointment>,
    pub confirmed_appointment: Option<ConfirmationId>,
    pub emergency_triggered: bool,
    pub abandon_reason: Option<AbandonReason>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, provider_id: ProviderId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            provider_id,
            state: CallState::Ringing,
            verified_record: None,
            outcome: None,
            started_at: now,
            ended_at: None,
            transcript: Vec::new(),
            verification_failures: 0,
            pending_readback: None,
            confirmed_appointment: None,
            emergency_triggered: false,
            abandon_reason: None,
            last_activity_at: now,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn push_utterance(&mut self, utterance: Utterance) -> Result<(), CallError> {
        if self.is_sealed() {
            return Err(CallError::SessionSealed { session_id: self.id.clone() });
        }
        if utterance.speaker == Speaker::Caller {
            self.last_activity_at = utterance.at;
        }
        self.transcript.push(utterance);
        Ok(())
    }

    pub fn say(&mut self, speaker: Speaker, text: impl Into<String>) -> Result<(), CallError> {
        self.push_utterance(Utterance {
            speaker,
            text: text.into(),
            at: Utc::now(),
            tool_call: None,
        })
    }

    /// Sets the terminal outcome and freezes the record. Sealing twice fails.
    pub fn seal(&mut self, outcome: CallOutcome, at: DateTime<Utc>) -> Result<(), CallError> {
        if self.is_sealed() {
            return Err(CallError::SessionSealed { session_id: self.id.clone() });
        }
        self.outcome = Some(outcome);
        self.ended_at = Some(at);
        Ok(())
    }
}
