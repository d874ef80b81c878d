//! Session runtime.
//!
//! Each live call is owned by one tokio task, the session actor. Inputs
//! arrive on an mpsc inbox and are handled one at a time, so transitions for
//! a session never interleave. Hangup and emergency travel on a separate
//! watch channel and preempt whatever the actor is waiting on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use frontdesk_core::config::AppConfig;
use frontdesk_core::domain::session::ToolCallRecord;
use frontdesk_core::gate::offered_tools;
use frontdesk_core::outcome::{classify, OutcomeFacts};
use frontdesk_core::{
    AbandonReason, Appointment, AuditActor, AuditCategory, AuditEvent, AuditOutcome,
    AuditRecorder, CallAction, CallContext, CallError, CallEvent, CallFlow,
    Classification, EmergencyClassifier, FlowEngine, ProviderId, Session, SessionId, Speaker,
    StreamingScanner, ToolKind, ToolRequest, TransitionOutcome, Utterance, EMERGENCY_SCRIPT,
};
use frontdesk_db::SessionRepository;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{error, info, warn};

use crate::conversation::{classify_readback_reply, oracle_request, ReadbackReply};
use crate::llm::{Oracle, OracleError, OracleReply, OracleRequest};
use crate::prompt::{greeting, system_prompt};
use crate::thinking::ThinkingPhrases;
use crate::tools::{failure_result, ToolExecutor, ToolOutcome};
use crate::transport::Transport;

const INBOX_CAPACITY: usize = 64;

const STAFF_HANDOFF: &str = "Let me connect you with our staff.";
const STAFF_FALLBACK: &str =
    "I'm unable to complete that right now. I'll connect you with our staff.";
const REPHRASE: &str = "I'm sorry, could you say that another way?";

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub practice_name: String,
    pub default_provider_id: ProviderId,
    pub emergency_line: String,
    pub staff_line: String,
    pub idle_timeout: Duration,
    pub max_tool_rounds: u32,
    pub oracle_timeout: Duration,
    pub oracle_retries: u32,
    pub transport_timeout: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            practice_name: config.practice.name.clone(),
            default_provider_id: ProviderId(config.practice.default_provider_id.clone()),
            emergency_line: config.practice.emergency_line.clone(),
            staff_line: config.practice.staff_line.clone(),
            idle_timeout: config.session.idle_timeout(),
            max_tool_rounds: config.session.max_tool_rounds.max(1),
            oracle_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            oracle_retries: config.llm.max_retries,
            transport_timeout: config.session.external_call_policy().timeout,
        }
    }
}

/// Everything a session actor needs. Shared by all sessions.
pub struct SessionServices {
    pub flow: FlowEngine<CallFlow>,
    pub recorder: Arc<AuditRecorder>,
    pub tools: ToolExecutor,
    pub classifier: EmergencyClassifier,
    pub oracle: Arc<dyn Oracle>,
    pub transport: Arc<dyn Transport>,
    pub archive: Arc<dyn SessionRepository>,
    pub settings: RuntimeSettings,
}

/// How an inbound utterance was handled at ingress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Final utterance queued for the actor.
    Queued,
    /// Partial utterance scanned; nothing to act on yet.
    Observed,
    Emergency { matched_phrase: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Interrupt {
    None,
    Hangup,
    Emergency { matched_phrase: String, utterance: String },
}

#[derive(Debug)]
enum SessionInput {
    Utterance { text: String },
    Activity,
    TransferRequested { reason: String },
}

struct SessionHandle {
    inbox: mpsc::Sender<SessionInput>,
    interrupts: watch::Sender<Interrupt>,
    snapshots: watch::Receiver<Session>,
    scanner: Mutex<StreamingScanner>,
}

impl SessionHandle {
    fn scan(&self, fragment: &str, is_final: bool) -> Classification {
        let mut scanner = match self.scanner.lock() {
            Ok(scanner) => scanner,
            Err(poisoned) => poisoned.into_inner(),
        };
        scanner.scan(fragment, is_final)
    }

    /// First interrupt wins; a hangup after an emergency changes nothing.
    fn raise(&self, interrupt: Interrupt) -> bool {
        self.interrupts.send_if_modified(|current| {
            if *current == Interrupt::None {
                *current = interrupt;
                true
            } else {
                false
            }
        })
    }

    fn is_sealed(&self) -> bool {
        self.snapshots.borrow().is_sealed()
    }
}

/// Keyed store of live sessions. Sealed sessions leave the map and are
/// served read-only from the archive.
pub struct SessionRegistry {
    services: Arc<SessionServices>,
    live: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(services: SessionServices) -> Self {
        Self { services: Arc::new(services), live: RwLock::new(HashMap::new()) }
    }

    pub fn services(&self) -> &Arc<SessionServices> {
        &self.services
    }

    pub async fn start_call(&self, provider_id: Option<ProviderId>) -> SessionId {
        let session_id = SessionId::generate();
        let provider_id =
            provider_id.unwrap_or_else(|| self.services.settings.default_provider_id.clone());
        let session = Session::new(session_id.clone(), provider_id, Utc::now());

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (interrupt_tx, interrupt_rx) = watch::channel(Interrupt::None);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.clone());

        let actor = SessionActor {
            services: Arc::clone(&self.services),
            session,
            inbox: inbox_rx,
            interrupts: interrupt_rx,
            snapshots: snapshot_tx,
            thinking: ThinkingPhrases::default(),
        };
        tokio::spawn(actor.run());

        let handle = SessionHandle {
            inbox: inbox_tx,
            interrupts: interrupt_tx,
            snapshots: snapshot_rx,
            scanner: Mutex::new(StreamingScanner::new(self.services.classifier.clone())),
        };
        self.live.write().await.insert(session_id.clone(), Arc::new(handle));
        info!(event_name = "session.started", session_id = %session_id);
        session_id
    }

    /// Every fragment, partial or final, is scanned for emergencies before
    /// anything else sees it.
    pub async fn deliver_utterance(
        &self,
        session_id: &SessionId,
        text: &str,
        is_final: bool,
    ) -> Result<Delivery, CallError> {
        let handle = self.handle(session_id).await?;

        if let Classification::Emergency { matched_phrase } = handle.scan(text, is_final) {
            warn!(
                event_name = "emergency.detected",
                session_id = %session_id,
                matched_phrase = %matched_phrase,
                is_final,
            );
            handle.raise(Interrupt::Emergency {
                matched_phrase: matched_phrase.clone(),
                utterance: text.to_owned(),
            });
            return Ok(Delivery::Emergency { matched_phrase });
        }

        let (input, delivery) = if is_final {
            (SessionInput::Utterance { text: text.to_owned() }, Delivery::Queued)
        } else {
            (SessionInput::Activity, Delivery::Observed)
        };
        handle
            .inbox
            .send(input)
            .await
            .map_err(|_| CallError::SessionSealed { session_id: session_id.clone() })?;
        Ok(delivery)
    }

    pub async fn hangup(&self, session_id: &SessionId) -> Result<(), CallError> {
        let handle = self.handle(session_id).await?;
        if handle.raise(Interrupt::Hangup) {
            info!(event_name = "session.hangup_received", session_id = %session_id);
        }
        Ok(())
    }

    pub async fn request_transfer(
        &self,
        session_id: &SessionId,
        reason: impl Into<String>,
    ) -> Result<(), CallError> {
        let handle = self.handle(session_id).await?;
        handle
            .inbox
            .send(SessionInput::TransferRequested { reason: reason.into() })
            .await
            .map_err(|_| CallError::SessionSealed { session_id: session_id.clone() })
    }

    /// Live view of the session, or the archived record once sealed.
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<Session, CallError> {
        if let Some(handle) = self.live.read().await.get(session_id) {
            return Ok(handle.snapshots.borrow().clone());
        }
        self.archived(session_id).await
    }

    /// Receiver that sees every published state of a live session.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
    ) -> Result<watch::Receiver<Session>, CallError> {
        match self.live.read().await.get(session_id) {
            Some(handle) => Ok(handle.snapshots.clone()),
            None => Err(CallError::SessionNotFound { session_id: session_id.clone() }),
        }
    }

    pub async fn wait_until_sealed(&self, session_id: &SessionId) -> Result<Session, CallError> {
        let receiver = self.live.read().await.get(session_id).map(|handle| handle.snapshots.clone());
        let Some(mut receiver) = receiver else {
            return self.archived(session_id).await;
        };

        let sealed = match receiver.wait_for(Session::is_sealed).await {
            Ok(session) => Some(session.clone()),
            Err(_) => None,
        };
        self.live.write().await.remove(session_id);
        match sealed {
            Some(session) => Ok(session),
            None => self.archived(session_id).await,
        }
    }

    pub async fn live_sessions(&self) -> usize {
        self.live.read().await.values().filter(|handle| !handle.is_sealed()).count()
    }

    async fn handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>, CallError> {
        let handle = self.live.read().await.get(session_id).cloned();
        match handle {
            Some(handle) if !handle.is_sealed() => Ok(handle),
            Some(_) => {
                self.live.write().await.remove(session_id);
                Err(CallError::SessionSealed { session_id: session_id.clone() })
            }
            None => match self.archived(session_id).await {
                Ok(_) => Err(CallError::SessionSealed { session_id: session_id.clone() }),
                Err(error) => Err(error),
            },
        }
    }

    async fn archived(&self, session_id: &SessionId) -> Result<Session, CallError> {
        match self.services.archive.find_by_id(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(CallError::SessionNotFound { session_id: session_id.clone() }),
            Err(error) => {
                warn!(event_name = "session.archive_read_failed", session_id = %session_id, error = %error);
                Err(CallError::SessionNotFound { session_id: session_id.clone() })
            }
        }
    }
}

enum Step {
    Continue,
    Interrupted,
    Ended,
}

enum ToolStep {
    /// Result is in the transcript; give the oracle another round.
    Consult,
    Done(Step),
}

struct SessionActor {
    services: Arc<SessionServices>,
    session: Session,
    inbox: mpsc::Receiver<SessionInput>,
    interrupts: watch::Receiver<Interrupt>,
    snapshots: watch::Sender<Session>,
    thinking: ThinkingPhrases,
}

impl SessionActor {
    async fn run(mut self) {
        match self.answer().await {
            Step::Continue => {}
            Step::Interrupted => return self.handle_interrupt().await,
            Step::Ended => return,
        }

        let idle_timeout = self.services.settings.idle_timeout;
        let mut deadline = Instant::now() + idle_timeout;
        loop {
            let step = tokio::select! {
                biased;
                _ = wait_for_interrupt(&mut self.interrupts) => Step::Interrupted,
                input = self.inbox.recv() => match input {
                    Some(input) => self.handle_input(input).await,
                    None => self.abandon(CallEvent::CallerHangup, AbandonReason::CallerHangup).await,
                },
                _ = sleep_until(deadline) => {
                    info!(event_name = "session.idle_timeout", session_id = %self.session.id);
                    self.abandon(CallEvent::IdleTimeout, AbandonReason::IdleTimeout).await
                }
            };
            match step {
                Step::Continue => deadline = Instant::now() + idle_timeout,
                Step::Interrupted => return self.handle_interrupt().await,
                Step::Ended => return,
            }
        }
    }

    async fn answer(&mut self) -> Step {
        if let Err(step) = self.transition(CallEvent::CallAnswered, AuditActor::System).await {
            return step;
        }
        let text = greeting(&self.services.settings.practice_name);
        self.speak(&text).await;
        Step::Continue
    }

    async fn handle_input(&mut self, input: SessionInput) -> Step {
        match input {
            SessionInput::Utterance { text } => self.on_utterance(text).await,
            SessionInput::Activity => {
                self.session.last_activity_at = Utc::now();
                Step::Continue
            }
            SessionInput::TransferRequested { reason } => {
                info!(event_name = "session.transfer_requested", session_id = %self.session.id, reason = %reason);
                self.hand_off(CallEvent::TransferRequested, AuditActor::Caller, None).await
            }
        }
    }

    async fn handle_interrupt(&mut self) {
        let interrupt = self.interrupts.borrow().clone();
        match interrupt {
            Interrupt::Emergency { matched_phrase, utterance } => {
                self.enter_emergency(&matched_phrase, &utterance).await
            }
            Interrupt::Hangup => {
                self.abandon(CallEvent::CallerHangup, AbandonReason::CallerHangup).await;
            }
            Interrupt::None => {}
        }
    }

    async fn on_utterance(&mut self, text: String) -> Step {
        if let Err(error) = self.session.say(Speaker::Caller, text.clone()) {
            warn!(event_name = "session.utterance_dropped", session_id = %self.session.id, error = %error);
            return Step::Ended;
        }
        self.publish();

        if let Err(step) = self.transition(CallEvent::UtteranceReceived, AuditActor::Caller).await {
            return step;
        }

        if let Some(pending) = self.session.pending_readback.clone() {
            match classify_readback_reply(&text) {
                ReadbackReply::Affirmative => return self.confirm_booking(pending).await,
                ReadbackReply::Negative => {
                    if let Err(step) = self.decline_booking(pending).await {
                        return step;
                    }
                }
                ReadbackReply::Unclear => {}
            }
        }

        self.consult_oracle().await
    }

    async fn consult_oracle(&mut self) -> Step {
        let services = Arc::clone(&self.services);
        let settings = &services.settings;

        for _ in 0..settings.max_tool_rounds {
            let state = self.session.state;
            let today = Utc::now().with_timezone(&services.tools.clock().offset).date_naive();
            let tools: Vec<Value> = offered_tools(state).iter().map(ToolKind::schema).collect();
            let request = oracle_request(
                system_prompt(&settings.practice_name, state, today),
                &self.session,
                tools,
            );

            let reply = ask_oracle(
                services.oracle.as_ref(),
                &request,
                settings.oracle_timeout,
                settings.oracle_retries,
            );
            let reply = match race(&mut self.interrupts, reply).await {
                None => return Step::Interrupted,
                Some(Ok(reply)) => reply,
                Some(Err(error)) => {
                    warn!(
                        event_name = "oracle.failed",
                        session_id = %self.session.id,
                        oracle = services.oracle.name(),
                        error = %error,
                    );
                    return self.degrade("oracle_unavailable").await;
                }
            };

            match reply {
                OracleReply::Text { text } => {
                    self.speak(&text).await;
                    return Step::Continue;
                }
                OracleReply::ToolCall { name, arguments, .. } => {
                    match self.run_tool(&name, arguments).await {
                        ToolStep::Consult => continue,
                        ToolStep::Done(step) => return step,
                    }
                }
            }
        }

        warn!(event_name = "oracle.tool_rounds_exhausted", session_id = %self.session.id);
        self.speak(REPHRASE).await;
        Step::Continue
    }

    async fn run_tool(&mut self, name: &str, arguments: Value) -> ToolStep {
        let services = Arc::clone(&self.services);

        let request = match ToolRequest::parse(name, arguments) {
            Ok(request) => request,
            Err(parse_error) => {
                let event = AuditEvent::new(
                    self.session.id.clone(),
                    "tool.invalid_call",
                    AuditCategory::Tool,
                    AuditActor::System,
                    AuditOutcome::Rejected,
                )
                .with_metadata("tool", name)
                .with_metadata("error", parse_error.to_string());
                if let Err(step) = self.audit(event).await {
                    return ToolStep::Done(step);
                }
                self.note_tool(name, json!({}), parse_error.to_result());
                return ToolStep::Consult;
            }
        };

        let kind = request.kind();
        let arguments = request.redacted_arguments();
        let authorized = match services.tools.gate().authorize(&self.session.id, self.session.state, request) {
            Ok(authorized) => authorized,
            Err(denied) => {
                let event = AuditEvent::new(
                    self.session.id.clone(),
                    "gate.tool_denied",
                    AuditCategory::Gate,
                    AuditActor::System,
                    AuditOutcome::Rejected,
                )
                .with_metadata("tool", kind.name())
                .with_metadata("state", self.session.state.as_str())
                .with_metadata("reason", denied.reason_code());
                if let Err(step) = self.audit(event).await {
                    return ToolStep::Done(step);
                }
                self.note_tool(kind.name(), arguments, failure_result(&denied));
                return ToolStep::Consult;
            }
        };

        // Nothing new is dispatched once an interrupt is pending.
        if *self.interrupts.borrow() != Interrupt::None {
            return ToolStep::Done(Step::Interrupted);
        }

        let event = AuditEvent::new(
            self.session.id.clone(),
            "tool.dispatched",
            AuditCategory::Tool,
            AuditActor::System,
            AuditOutcome::Success,
        )
        .with_metadata("tool", kind.name())
        .with_metadata("state", self.session.state.as_str())
        .with_metadata("arguments", arguments.to_string());
        if let Err(step) = self.audit(event).await {
            return ToolStep::Done(step);
        }

        self.speak_filler(kind).await;
        let executor = services.tools.clone();
        let session_id = self.session.id.clone();
        let task = tokio::spawn(async move { executor.dispatch(&session_id, authorized).await });

        // An interrupt detaches the task: it may still finish server-side,
        // but its result never reaches this session.
        let outcome = match race(&mut self.interrupts, task).await {
            None => {
                info!(event_name = "tool.detached", session_id = %self.session.id, tool = kind.name());
                return ToolStep::Done(Step::Interrupted);
            }
            Some(Ok(outcome)) => outcome,
            Some(Err(join_error)) => {
                error!(event_name = "tool.task_failed", session_id = %self.session.id, tool = kind.name(), error = %join_error);
                ToolOutcome::Failed(CallError::ExternalTimeout { operation: kind.name().to_owned() })
            }
        };

        self.apply_tool_outcome(kind, arguments, outcome).await
    }

    async fn apply_tool_outcome(
        &mut self,
        kind: ToolKind,
        arguments: Value,
        outcome: ToolOutcome,
    ) -> ToolStep {
        let (audit_outcome, reason) = match &outcome {
            ToolOutcome::Failed(error) if error.is_recoverable() => {
                (AuditOutcome::Rejected, error.reason_code())
            }
            ToolOutcome::Failed(error) => (AuditOutcome::Failed, error.reason_code()),
            _ => (AuditOutcome::Success, "ok"),
        };
        let event = AuditEvent::new(
            self.session.id.clone(),
            "tool.completed",
            AuditCategory::Tool,
            AuditActor::System,
            audit_outcome,
        )
        .with_metadata("tool", kind.name())
        .with_metadata("reason", reason);
        if let Err(step) = self.audit(event).await {
            return ToolStep::Done(step);
        }
        self.note_tool(kind.name(), arguments, outcome.oracle_result());

        match outcome {
            ToolOutcome::Verified { record_id } => {
                self.session.verified_record = Some(record_id);
                match self.transition(CallEvent::IdentityVerified, AuditActor::System).await {
                    Ok(_) => ToolStep::Consult,
                    Err(step) => ToolStep::Done(step),
                }
            }
            ToolOutcome::Failed(error) if kind == ToolKind::VerifyIdentity => {
                self.session.verification_failures =
                    self.services.tools.gate().status(&self.session.id).failures;
                self.publish();
                match error {
                    CallError::VerificationExhausted => ToolStep::Done(
                        self.hand_off(
                            CallEvent::VerificationExhausted,
                            AuditActor::System,
                            Some(error.user_message()),
                        )
                        .await,
                    ),
                    error if error.is_recoverable() => ToolStep::Consult,
                    error => ToolStep::Done(self.degrade(error.reason_code()).await),
                }
            }
            ToolOutcome::Failed(error) if error.is_recoverable() => ToolStep::Consult,
            ToolOutcome::Failed(error) => ToolStep::Done(self.degrade(error.reason_code()).await),
            ToolOutcome::Answer { .. } => ToolStep::Consult,
            ToolOutcome::Transfer { reason } => {
                info!(event_name = "session.staff_transfer", session_id = %self.session.id, reason = %reason);
                ToolStep::Done(
                    self.hand_off(CallEvent::TransferRequested, AuditActor::System, Some(STAFF_HANDOFF))
                        .await,
                )
            }
            ToolOutcome::EndCall => ToolStep::Done(self.complete().await),
            ToolOutcome::Booked(receipt) => {
                self.session.pending_readback = Some(receipt.appointment.clone());
                if let Err(step) = self.transition(CallEvent::BookingCommitted, AuditActor::System).await {
                    return ToolStep::Done(step);
                }

                let booked = AuditEvent::new(
                    self.session.id.clone(),
                    "scheduling.appointment_booked",
                    AuditCategory::Scheduling,
                    AuditActor::System,
                    AuditOutcome::Success,
                )
                .with_metadata("confirmation_id", receipt.appointment.confirmation_id.0.clone())
                .with_metadata("slot_id", receipt.appointment.slot_id.0.clone())
                .with_metadata("visit_type", receipt.appointment.visit_type.as_str());
                if let Err(step) = self.audit(booked).await {
                    return ToolStep::Done(step);
                }

                let notification = AuditEvent::new(
                    self.session.id.clone(),
                    "notification.dispatch",
                    AuditCategory::Notification,
                    AuditActor::System,
                    if receipt.notification_attempted { AuditOutcome::Success } else { AuditOutcome::Failed },
                )
                .with_metadata("confirmation_id", receipt.appointment.confirmation_id.0.clone())
                .with_metadata("attempted", receipt.notification_attempted.to_string());
                if let Err(step) = self.audit(notification).await {
                    return ToolStep::Done(step);
                }

                self.speak(&receipt.readback.script()).await;
                ToolStep::Done(Step::Continue)
            }
        }
    }

    async fn confirm_booking(&mut self, appointment: Appointment) -> Step {
        if let Err(step) = self.transition(CallEvent::BookingConfirmed, AuditActor::Caller).await {
            return step;
        }
        let event = AuditEvent::new(
            self.session.id.clone(),
            "booking.confirmed",
            AuditCategory::Scheduling,
            AuditActor::Caller,
            AuditOutcome::Success,
        )
        .with_metadata("confirmation_id", appointment.confirmation_id.0.clone());
        if let Err(step) = self.audit(event).await {
            return step;
        }

        self.session.pending_readback = None;
        self.session.confirmed_appointment = Some(appointment.confirmation_id.clone());
        self.publish();
        info!(
            event_name = "booking.confirmed",
            session_id = %self.session.id,
            confirmation_id = %appointment.confirmation_id,
        );

        let spelled = appointment.confirmation_id.0.chars().map(String::from).collect::<Vec<_>>().join(" ");
        self.speak(&format!(
            "You're all set. Your confirmation number is {spelled}. Is there anything else I can help you with?"
        ))
        .await;
        Step::Continue
    }

    /// Releases the slot and returns to VERIFIED so another time can be
    /// offered. A failed release is audited but does not end the call.
    async fn decline_booking(&mut self, appointment: Appointment) -> Result<(), Step> {
        self.transition(CallEvent::BookingDeclined, AuditActor::Caller).await?;
        self.session.pending_readback = None;
        self.publish();

        let released = self.services.tools.scheduling().cancel(&appointment.confirmation_id).await;
        let (event_type, outcome) = match &released {
            Ok(_) => ("scheduling.booking_released", AuditOutcome::Success),
            Err(_) => ("scheduling.release_failed", AuditOutcome::Failed),
        };
        let event = AuditEvent::new(
            self.session.id.clone(),
            event_type,
            AuditCategory::Scheduling,
            AuditActor::System,
            outcome,
        )
        .with_metadata("confirmation_id", appointment.confirmation_id.0.clone())
        .with_metadata("slot_id", appointment.slot_id.0.clone());
        self.audit(event).await
    }

    async fn complete(&mut self) -> Step {
        if let Err(step) = self.transition(CallEvent::CallCompleted, AuditActor::System).await {
            return step;
        }
        let farewell =
            format!("Thank you for calling {}. Goodbye.", self.services.settings.practice_name);
        self.speak(&farewell).await;
        self.seal().await;
        Step::Ended
    }

    /// Transfer to staff, either asked for or as the fallback for anything
    /// this session cannot finish.
    async fn hand_off(&mut self, event: CallEvent, actor: AuditActor, message: Option<&str>) -> Step {
        if let Err(step) = self.transition(event, actor).await {
            return step;
        }
        if let Some(message) = message {
            self.speak(message).await;
        }
        let staff_line = self.services.settings.staff_line.clone();
        self.transfer(&staff_line).await;
        self.seal().await;
        Step::Ended
    }

    async fn degrade(&mut self, reason: &str) -> Step {
        warn!(event_name = "session.degraded_to_staff", session_id = %self.session.id, reason);
        self.hand_off(CallEvent::TransferRequested, AuditActor::System, Some(STAFF_FALLBACK)).await
    }

    async fn abandon(&mut self, event: CallEvent, reason: AbandonReason) -> Step {
        let actor = match event {
            CallEvent::CallerHangup => AuditActor::Caller,
            _ => AuditActor::System,
        };
        if let Err(step) = self.transition(event, actor).await {
            return step;
        }
        self.session.abandon_reason = Some(reason);
        self.seal().await;
        Step::Ended
    }

    /// Runs whatever the session was doing to the ground: audio stops, the
    /// script is spoken, the caller is sent to the emergency line. The safety
    /// path proceeds even when the audit sink is down.
    async fn enter_emergency(&mut self, matched_phrase: &str, utterance: &str) {
        let services = Arc::clone(&self.services);
        self.session.emergency_triggered = true;
        if !utterance.trim().is_empty() {
            if let Err(error) = self.session.say(Speaker::Caller, utterance) {
                warn!(event_name = "session.utterance_dropped", session_id = %self.session.id, error = %error);
            }
        }
        self.publish();

        let detected = AuditEvent::new(
            self.session.id.clone(),
            "emergency.detected",
            AuditCategory::Emergency,
            AuditActor::Caller,
            AuditOutcome::Success,
        )
        .with_metadata("matched_phrase", matched_phrase)
        .with_metadata("state", self.session.state.as_str());
        if let Err(error) = services.recorder.record(detected).await {
            error!(event_name = "emergency.unaudited", session_id = %self.session.id, error = %error);
        }

        let context = self.context();
        let outcome = match services
            .flow
            .apply_with_audit(
                &self.session.id,
                self.session.state,
                CallEvent::EmergencySignal,
                &context,
                &services.recorder,
                AuditActor::System,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(audit_error) => {
                error!(event_name = "emergency.transition_unaudited", session_id = %self.session.id, error = %audit_error);
                match services.flow.apply(self.session.state, CallEvent::EmergencySignal, &context) {
                    Ok(outcome) => outcome,
                    Err(invalid) => {
                        warn!(event_name = "emergency.ignored", session_id = %self.session.id, error = %invalid);
                        return;
                    }
                }
            }
        };
        self.session.state = outcome.to;
        self.publish();

        for action in outcome.actions {
            match action {
                CallAction::StopAudio => self.stop_audio().await,
                CallAction::SpeakEmergencyScript => self.speak(EMERGENCY_SCRIPT).await,
                CallAction::TransferToEmergencyLine => {
                    let line = services.settings.emergency_line.clone();
                    self.transfer(&line).await;
                }
                CallAction::SealSession => self.seal().await,
                other => warn!(event_name = "emergency.unexpected_action", action = ?other),
            }
        }
    }

    /// Audit-failure path: the requested transition never happened. The
    /// session ends ABANDONED and is tagged so it can be told apart.
    async fn fail_closed(&mut self, reason: &str) {
        error!(event_name = "session.audit_failure", session_id = %self.session.id, reason);
        let services = Arc::clone(&self.services);
        let outcome = match services.flow.apply(self.session.state, CallEvent::AuditFailure, &self.context()) {
            Ok(outcome) => outcome,
            Err(invalid) => {
                warn!(event_name = "session.audit_failure_ignored", session_id = %self.session.id, error = %invalid);
                return;
            }
        };
        self.session.state = outcome.to;
        self.session.abandon_reason = Some(AbandonReason::AuditFailure);
        self.publish();

        let tag = AuditEvent::new(
            self.session.id.clone(),
            "session.abandoned_audit_failure",
            AuditCategory::System,
            AuditActor::System,
            AuditOutcome::Failed,
        )
        .with_metadata("reason", reason);
        if let Err(error) = services.recorder.record(tag).await {
            warn!(event_name = "session.audit_failure_unaudited", session_id = %self.session.id, error = %error);
        }

        for action in outcome.actions {
            match action {
                CallAction::TransferToStaff => {
                    self.speak(STAFF_FALLBACK).await;
                    let staff_line = services.settings.staff_line.clone();
                    self.transfer(&staff_line).await;
                }
                CallAction::SealSession => self.seal().await,
                _ => {}
            }
        }
    }

    async fn seal(&mut self) {
        let services = Arc::clone(&self.services);
        let Some(outcome) = classify(self.session.state, OutcomeFacts::from_session(&self.session))
        else {
            warn!(event_name = "session.seal_skipped", session_id = %self.session.id, state = self.session.state.as_str());
            return;
        };

        let mut event = AuditEvent::new(
            self.session.id.clone(),
            "session.sealed",
            AuditCategory::Flow,
            AuditActor::System,
            AuditOutcome::Success,
        )
        .with_metadata("outcome", outcome.as_str())
        .with_metadata("state", self.session.state.as_str());
        if let Some(reason) = self.session.abandon_reason {
            event = event.with_metadata("abandon_reason", reason.as_str());
        }
        if let Some(pending) = self.session.pending_readback.take() {
            let released = self.release_unconfirmed(&pending).await;
            event = event
                .with_metadata("unconfirmed_booking", pending.confirmation_id.0.clone())
                .with_metadata("unconfirmed_booking_released", released.to_string());
        }
        if let Err(error) = services.recorder.record(event).await {
            error!(event_name = "session.seal_unaudited", session_id = %self.session.id, error = %error);
        }

        if let Err(error) = self.session.seal(outcome, Utc::now()) {
            warn!(event_name = "session.seal_failed", session_id = %self.session.id, error = %error);
            return;
        }
        if let Err(error) = services.archive.save(&self.session).await {
            error!(event_name = "session.archive_failed", session_id = %self.session.id, error = %error);
        }
        services.tools.gate().forget(&self.session.id);
        services.recorder.forget(&self.session.id);

        info!(
            event_name = "session.sealed",
            session_id = %self.session.id,
            state = self.session.state.as_str(),
            outcome = outcome.as_str(),
            turns = self.session.transcript.len(),
        );
        self.publish();
    }

    /// A readback the caller never answered does not hold the slot past the
    /// end of the call.
    async fn release_unconfirmed(&self, appointment: &Appointment) -> bool {
        match self.services.tools.scheduling().cancel(&appointment.confirmation_id).await {
            Ok(_) => {
                info!(
                    event_name = "scheduling.unconfirmed_booking_released",
                    session_id = %self.session.id,
                    confirmation_id = %appointment.confirmation_id,
                    slot_id = %appointment.slot_id,
                );
                true
            }
            Err(error) => {
                warn!(
                    event_name = "scheduling.unconfirmed_release_failed",
                    session_id = %self.session.id,
                    confirmation_id = %appointment.confirmation_id,
                    error = %error,
                );
                false
            }
        }
    }

    /// Applies `event` once its audit record is durable. On audit failure the
    /// session is closed and `Err(Step::Ended)` is returned.
    async fn transition(&mut self, event: CallEvent, actor: AuditActor) -> Result<TransitionOutcome, Step> {
        let services = Arc::clone(&self.services);
        let result = services
            .flow
            .apply_with_audit(
                &self.session.id,
                self.session.state,
                event,
                &self.context(),
                &services.recorder,
                actor,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.session.state = outcome.to;
                self.publish();
                Ok(outcome)
            }
            Err(CallError::AuditWriteFailure(reason)) => {
                self.fail_closed(&reason).await;
                Err(Step::Ended)
            }
            Err(error) => {
                warn!(
                    event_name = "flow.transition_refused",
                    session_id = %self.session.id,
                    state = self.session.state.as_str(),
                    event = event.as_str(),
                    error = %error,
                );
                Err(Step::Continue)
            }
        }
    }

    async fn audit(&mut self, event: AuditEvent) -> Result<(), Step> {
        match self.services.recorder.record(event).await {
            Ok(_) => Ok(()),
            Err(error) => {
                self.fail_closed(&error.to_string()).await;
                Err(Step::Ended)
            }
        }
    }

    fn context(&self) -> CallContext {
        CallContext {
            record_bound: self.session.verified_record.is_some(),
            readback_pending: self.session.pending_readback.is_some(),
        }
    }

    fn note_tool(&mut self, tool: &str, arguments: Value, result: Value) {
        let entry = Utterance {
            speaker: Speaker::System,
            text: format!("tool:{tool}"),
            at: Utc::now(),
            tool_call: Some(ToolCallRecord { tool: tool.to_owned(), arguments, result: Some(result) }),
        };
        if let Err(error) = self.session.push_utterance(entry) {
            warn!(event_name = "session.tool_note_dropped", session_id = %self.session.id, error = %error);
        }
        self.publish();
    }

    async fn speak(&mut self, text: &str) {
        if let Err(error) = self.session.say(Speaker::Agent, text) {
            warn!(event_name = "session.speech_dropped", session_id = %self.session.id, error = %error);
            return;
        }
        self.publish();
        let transport = Arc::clone(&self.services.transport);
        match timeout(self.services.settings.transport_timeout, transport.speak(&self.session.id, text)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(event_name = "transport.speak_failed", session_id = %self.session.id, error = %error),
            Err(_) => warn!(event_name = "transport.speak_timed_out", session_id = %self.session.id),
        }
    }

    /// Covers tool latency on the line only; the transcript keeps what the
    /// caller said and what the agent answered.
    async fn speak_filler(&mut self, kind: ToolKind) {
        let Some(phrase) = self.thinking.next(kind) else {
            return;
        };
        let transport = Arc::clone(&self.services.transport);
        match timeout(self.services.settings.transport_timeout, transport.speak(&self.session.id, phrase)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(event_name = "transport.speak_failed", session_id = %self.session.id, error = %error),
            Err(_) => warn!(event_name = "transport.speak_timed_out", session_id = %self.session.id),
        }
    }

    async fn stop_audio(&mut self) {
        let transport = Arc::clone(&self.services.transport);
        match timeout(self.services.settings.transport_timeout, transport.stop_audio(&self.session.id)).await {
            Ok(Ok(())) => info!(event_name = "transport.audio_stopped", session_id = %self.session.id),
            Ok(Err(error)) => warn!(event_name = "transport.stop_failed", session_id = %self.session.id, error = %error),
            Err(_) => warn!(event_name = "transport.stop_timed_out", session_id = %self.session.id),
        }
    }

    async fn transfer(&mut self, destination: &str) {
        let transport = Arc::clone(&self.services.transport);
        match timeout(
            self.services.settings.transport_timeout,
            transport.transfer(&self.session.id, destination),
        )
        .await
        {
            Ok(Ok(())) => info!(event_name = "transport.transferred", session_id = %self.session.id, destination),
            Ok(Err(error)) => error!(event_name = "transport.transfer_failed", session_id = %self.session.id, error = %error),
            Err(_) => error!(event_name = "transport.transfer_timed_out", session_id = %self.session.id),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.clone());
    }
}

async fn wait_for_interrupt(interrupts: &mut watch::Receiver<Interrupt>) {
    if interrupts.wait_for(|interrupt| *interrupt != Interrupt::None).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// `None` when an interrupt arrives first; `future` is dropped then.
async fn race<T>(
    interrupts: &mut watch::Receiver<Interrupt>,
    future: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = wait_for_interrupt(interrupts) => None,
        value = future => Some(value),
    }
}

async fn ask_oracle(
    oracle: &dyn Oracle,
    request: &OracleRequest,
    limit: Duration,
    retries: u32,
) -> Result<OracleReply, OracleError> {
    let mut attempt = 0;
    loop {
        let failure = match timeout(limit, oracle.respond(request)).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(error)) => error,
            Err(_) => OracleError::Timeout,
        };
        if !failure.is_transient() || attempt >= retries {
            return Err(failure);
        }
        warn!(event_name = "oracle.retrying", attempt, error = %failure);
        attempt += 1;
    }
}
