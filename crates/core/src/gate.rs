//! Verification gate.
//!
//! Every tool dispatch passes through [`VerificationGate::authorize`], which is
//! the only constructor of [`AuthorizedTool`]. Dispatch code accepts nothing
//! else, so there is no second path to a PHI-bearing operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::info;

use crate::domain::record::RecordId;
use crate::domain::session::{CallState, SessionId};
use crate::errors::CallError;
use crate::records::{RecordLookup, RecordMatch};
use crate::retry::{call_external, ExternalCallPolicy};
use crate::tools::{ToolClass, ToolKind, ToolRequest};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Pure authorization predicate over session state and static tool class.
pub fn is_authorized(state: CallState, tool: ToolKind) -> bool {
    if state.is_terminal() || state == CallState::Ringing {
        return false;
    }
    match tool.classification() {
        ToolClass::Public => true,
        ToolClass::IdentityCollection => matches!(state, CallState::Greeting | CallState::Routing),
        ToolClass::PhiBearing => state == CallState::Verified,
    }
}

/// Tools the oracle may be offered in `state`.
pub fn offered_tools(state: CallState) -> Vec<ToolKind> {
    ToolKind::ALL.into_iter().filter(|tool| is_authorized(state, *tool)).collect()
}

/// Proof that a request passed the gate for a given state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizedTool {
    session_id: SessionId,
    request: ToolRequest,
    state: CallState,
    record: Option<RecordId>,
}

impl AuthorizedTool {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn request(&self) -> &ToolRequest {
        &self.request
    }

    pub fn kind(&self) -> ToolKind {
        self.request.kind()
    }

    pub fn authorized_in(&self) -> CallState {
        self.state
    }

    /// Verified record for PHI-bearing tools; `None` otherwise.
    pub fn record(&self) -> Option<&RecordId> {
        self.record.as_ref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateStatus {
    pub failures: u32,
    pub verified: Option<RecordId>,
}

pub struct VerificationGate {
    lookup: Arc<dyn RecordLookup>,
    max_attempts: u32,
    policy: ExternalCallPolicy,
    sessions: Mutex<HashMap<SessionId, GateStatus>>,
}

impl VerificationGate {
    pub fn new(lookup: Arc<dyn RecordLookup>, max_attempts: u32, policy: ExternalCallPolicy) -> Self {
        Self { lookup, max_attempts: max_attempts.max(1), policy, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn status(&self, session_id: &SessionId) -> GateStatus {
        self.with_sessions(|sessions| sessions.get(session_id).cloned().unwrap_or_default())
    }

    pub fn forget(&self, session_id: &SessionId) {
        self.with_sessions(|sessions| {
            sessions.remove(session_id);
        });
    }

    /// Resolves an identity claim. On success the record is bound to the
    /// session. Failed claims count against the attempt budget; lookup
    /// outages do not.
    pub async fn verify(
        &self,
        session_id: &SessionId,
        claimed_name: &str,
        claimed_dob: &str,
    ) -> Result<RecordId, CallError> {
        let status = self.status(session_id);
        if let Some(record) = status.verified {
            return Ok(record);
        }
        if status.failures >= self.max_attempts {
            return Err(CallError::VerificationExhausted);
        }

        let Some(date_of_birth) = parse_date_of_birth(claimed_dob) else {
            return Err(self.record_failure(session_id, 0));
        };

        let lookup = Arc::clone(&self.lookup);
        let candidates = call_external("record_lookup", &self.policy, || {
            let lookup = Arc::clone(&lookup);
            let claimed_name = claimed_name.to_owned();
            async move { lookup.find_candidates(&claimed_name, date_of_birth).await }
        })
        .await
        .map_err(|_| CallError::ExternalTimeout { operation: "record_lookup".to_owned() })?;

        match select_confident(&candidates) {
            Some(record_id) => {
                self.with_sessions(|sessions| {
                    sessions.entry(session_id.clone()).or_default().verified =
                        Some(record_id.clone());
                });
                info!(
                    event_name = "gate.identity_verified",
                    session_id = %session_id,
                    candidates = candidates.len(),
                );
                Ok(record_id)
            }
            None => Err(self.record_failure(session_id, candidates.len())),
        }
    }

    /// The single choke point for tool dispatch.
    pub fn authorize(
        &self,
        session_id: &SessionId,
        state: CallState,
        request: ToolRequest,
    ) -> Result<AuthorizedTool, CallError> {
        let tool = request.kind();
        if !is_authorized(state, tool) {
            return Err(CallError::GateDenied { tool });
        }

        let record = if tool.classification() == ToolClass::PhiBearing {
            // State and gate must agree; a VERIFIED state without a bound
            // record is treated as unverified.
            let Some(record) = self.status(session_id).verified else {
                return Err(CallError::GateDenied { tool });
            };
            Some(record)
        } else {
            None
        };

        Ok(AuthorizedTool { session_id: session_id.clone(), request, state, record })
    }

    fn record_failure(&self, session_id: &SessionId, candidates: usize) -> CallError {
        let failures = self.with_sessions(|sessions| {
            let status = sessions.entry(session_id.clone()).or_default();
            status.failures += 1;
            status.failures
        });
        let attempts_remaining = self.max_attempts.saturating_sub(failures);
        info!(
            event_name = "gate.identity_rejected",
            session_id = %session_id,
            candidates,
            attempts_remaining,
        );

        if attempts_remaining == 0 {
            CallError::VerificationExhausted
        } else if candidates > 1 {
            CallError::AmbiguousIdentity { candidates, attempts_remaining }
        } else {
            CallError::NoMatch { attempts_remaining }
        }
    }

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<SessionId, GateStatus>) -> T) -> T {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut sessions)
    }
}

/// One candidate wins outright; among several, only a single exact name
/// match is confident.
fn select_confident(candidates: &[RecordMatch]) -> Option<RecordId> {
    match candidates {
        [only] => Some(only.record_id.clone()),
        [] => None,
        many => {
            let mut exact = many.iter().filter(|candidate| candidate.exact_name);
            match (exact.next(), exact.next()) {
                (Some(winner), None) => Some(winner.record_id.clone()),
                _ => None,
            }
        }
    }
}

fn parse_date_of_birth(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%B %d, %Y", "%B %d %Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}
