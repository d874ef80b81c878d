use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::session::SessionId;
use crate::retry::BackoffPolicy;

/// Metadata keys whose values are fingerprinted instead of stored.
pub const SENSITIVE_KEYS: &[&str] = &[
    "name",
    "full_name",
    "claimed_name",
    "date_of_birth",
    "dob",
    "phone",
    "email",
    "contact",
    "insurance_ref",
    "plan_id",
    "member_id",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Flow,
    Gate,
    Emergency,
    Tool,
    Scheduling,
    Notification,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Gate => "gate",
            Self::Emergency => "emergency",
            Self::Tool => "tool",
            Self::Scheduling => "scheduling",
            Self::Notification => "notification",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flow" => Some(Self::Flow),
            "gate" => Some(Self::Gate),
            "emergency" => Some(Self::Emergency),
            "tool" => Some(Self::Tool),
            "scheduling" => Some(Self::Scheduling),
            "notification" => Some(Self::Notification),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditActor {
    System,
    Caller,
}

impl AuditActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Caller => "caller",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "caller" => Some(Self::Caller),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One transition or tool invocation. `sequence`, `prev_hash` and
/// `entry_hash` are assigned by [`AuditRecorder`] when the event is appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub session_id: SessionId,
    pub sequence: u64,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: AuditActor,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEvent {
    pub fn new(
        session_id: SessionId,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: AuditActor,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id,
            sequence: 0,
            event_type: event_type.into(),
            category,
            actor,
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
            prev_hash: None,
            entry_hash: String::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let value = if is_sensitive_key(&key) { redact(&value) } else { value };
        self.metadata.insert(key, value);
        self
    }

    pub fn compute_hash(&self) -> String {
        let metadata = serde_json::to_string(&self.metadata).unwrap_or_default();
        let material = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.session_id,
            self.sequence,
            self.event_type,
            self.category.as_str(),
            self.actor.as_str(),
            self.outcome.as_str(),
            metadata,
            self.occurred_at.to_rfc3339(),
            self.prev_hash.as_deref().unwrap_or(""),
        );
        sha256_hex(material.as_bytes())
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|sensitive| key.eq_ignore_ascii_case(sensitive))
}

/// Stable fingerprint so two events about the same value can be correlated
/// without storing the value.
pub fn redact(value: &str) -> String {
    let digest = sha256_hex(value.trim().to_lowercase().as_bytes());
    format!("redacted:{}", &digest[..12])
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("audit sequence {sequence} already exists for session {session_id}")]
    DuplicateSequence { session_id: SessionId, sequence: u64 },
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Events for one session ordered by sequence.
    async fn events_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AuditEvent>, AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
    failures_remaining: Arc<AtomicU32>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes the next `count` appends fail.
    pub fn fail_next_appends(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AuditError::Unavailable("injected failure".to_string()));
        }

        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        let duplicate = events.iter().any(|existing| {
            existing.session_id == event.session_id && existing.sequence == event.sequence
        });
        if duplicate {
            return Err(AuditError::DuplicateSequence {
                session_id: event.session_id.clone(),
                sequence: event.sequence,
            });
        }
        events.push(event.clone());
        Ok(())
    }

    async fn events_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events: Vec<AuditEvent> =
            self.events().into_iter().filter(|event| &event.session_id == session_id).collect();
        events.sort_by_key(|event| event.sequence);
        Ok(events)
    }
}

#[derive(Clone, Debug, Default)]
struct ChainHead {
    next_sequence: u64,
    last_hash: Option<String>,
}

/// Chains and appends events. Each session has its own head, so sessions
/// never wait on each other; within a session appends are serialized.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    backoff: BackoffPolicy,
    heads: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<ChainHead>>>>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, backoff: BackoffPolicy) -> Self {
        Self { sink, backoff, heads: Mutex::new(HashMap::new()) }
    }

    pub fn sink(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.sink)
    }

    /// Appends with bounded retries. On error the chain head is unchanged and
    /// the caller must not apply whatever the event describes.
    pub async fn record(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let head = self.head_for(&event.session_id);
        let mut head = head.lock().await;

        event.sequence = head.next_sequence;
        event.prev_hash = head.last_hash.clone();
        event.entry_hash = event.compute_hash();

        let mut attempt = 0;
        loop {
            match self.sink.append(&event).await {
                Ok(()) => break,
                Err(append_error) => {
                    attempt += 1;
                    if attempt >= self.backoff.max_attempts {
                        error!(
                            event_name = "audit.append_failed",
                            session_id = %event.session_id,
                            audit_event = %event.event_type,
                            attempts = attempt,
                            error = %append_error,
                            "audit append exhausted retries"
                        );
                        return Err(append_error);
                    }
                    warn!(
                        event_name = "audit.append_retry",
                        session_id = %event.session_id,
                        attempt,
                        error = %append_error,
                    );
                    tokio::time::sleep(self.backoff.backoff(attempt - 1)).await;
                }
            }
        }

        head.next_sequence += 1;
        head.last_hash = Some(event.entry_hash.clone());
        Ok(event)
    }

    /// Drops the in-memory head once a session is sealed.
    pub fn forget(&self, session_id: &SessionId) {
        let mut heads = match self.heads.lock() {
            Ok(heads) => heads,
            Err(poisoned) => poisoned.into_inner(),
        };
        heads.remove(session_id);
    }

    fn head_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<ChainHead>> {
        let mut heads = match self.heads.lock() {
            Ok(heads) => heads,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(heads.entry(session_id.clone()).or_default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub verified_events: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Checks a read-back stream for gaps, reordering and tampering.
pub fn verify_chain(events: &[AuditEvent]) -> ChainVerification {
    let mut previous_hash: Option<String> = None;
    for (index, event) in events.iter().enumerate() {
        let failure = if event.sequence != index as u64 {
            Some(format!(
                "sequence gap at event {}: expected {index}, found {}",
                event.event_id, event.sequence
            ))
        } else if event.prev_hash != previous_hash {
            Some(format!("previous hash mismatch at event {}", event.event_id))
        } else if event.compute_hash() != event.entry_hash {
            Some(format!("entry hash mismatch at event {}", event.event_id))
        } else {
            None
        };

        if let Some(reason) = failure {
            return ChainVerification {
                valid: false,
                verified_events: index,
                latest_hash: previous_hash,
                failure_reason: Some(reason),
            };
        }
        previous_hash = Some(event.entry_hash.clone());
    }

    ChainVerification {
        valid: true,
        verified_events: events.len(),
        latest_hash: previous_hash,
        failure_reason: None,
    }
}

fn sha256_hex(payload: &[u8]) -> String {
    Sha256::digest(payload).iter().map(|byte| format!("{byte:02x}")).collect()
}
