use serde::{Deserialize, Serialize};

use crate::domain::session::{CallState, Session};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Scheduled,
    Answered,
    Transferred,
    Abandoned,
    Emergency,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Answered => "answered",
            Self::Transferred => "transferred",
            Self::Abandoned => "abandoned",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "answered" => Some(Self::Answered),
            "transferred" => Some(Self::Transferred),
            "abandoned" => Some(Self::Abandoned),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// Session facts the classification reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutcomeFacts {
    pub emergency_triggered: bool,
    pub confirmed_appointment: bool,
}

impl OutcomeFacts {
    pub fn from_session(session: &Session) -> Self {
        Self {
            emergency_triggered: session.emergency_triggered,
            confirmed_appointment: session.confirmed_appointment.is_some(),
        }
    }
}

/// Exactly one outcome per terminal state. When several could apply the
/// order is emergency > transferred > scheduled > answered > abandoned.
/// Returns `None` for live states.
pub fn classify(terminal_state: CallState, facts: OutcomeFacts) -> Option<CallOutcome> {
    if !terminal_state.is_terminal() {
        return None;
    }
    if facts.emergency_triggered || terminal_state == CallState::Emergency {
        return Some(CallOutcome::Emergency);
    }

    let outcome = match terminal_state {
        CallState::Transferred => CallOutcome::Transferred,
        _ if facts.confirmed_appointment => CallOutcome::Scheduled,
        CallState::Completed => CallOutcome::Answered,
        _ => CallOutcome::Abandoned,
    };
    Some(outcome)
}
