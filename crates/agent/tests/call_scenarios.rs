use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;

use frontdesk_agent::llm::OracleRequest;
use frontdesk_agent::thinking::phrase_pool;
use frontdesk_agent::{
    BufferedTransport, Delivery, RuntimeSettings, ScriptedOracle, SessionRegistry,
    SessionServices, ToolExecutor, TransportCommand,
};
use frontdesk_core::notification::RecordingNotificationGateway;
use frontdesk_core::{
    AbandonReason, Appointment, AppointmentStatus, AuditRecorder, AvailabilityStore,
    BackoffPolicy, CallError, CallOutcome, CallState, ConfirmationId, ContactInfo,
    EmergencyClassifier, ExternalCallPolicy, FlowEngine, InMemoryAuditSink,
    InMemoryAvailabilityStore, InMemoryRecordLookup, KnowledgeBase, PracticeClock, Provider,
    ProviderId, Record, RecordId, SchedulingOrchestrator, Session, SessionId, Slot, SlotId,
    SlotStatus, Speaker, StoreError, ToolKind, VerificationGate, VisitType, EMERGENCY_SCRIPT,
};
use frontdesk_db::InMemorySessionRepository;

const STAFF_LINE: &str = "+15558675309";

struct Harness {
    registry: SessionRegistry,
    oracle: Arc<ScriptedOracle>,
    transport: Arc<BufferedTransport>,
    audit: InMemoryAuditSink,
    store: Arc<dyn AvailabilityStore>,
    notifications: RecordingNotificationGateway,
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        practice_name: "Valley Family Medicine".to_string(),
        default_provider_id: ProviderId("valley-family".to_string()),
        emergency_line: "911".to_string(),
        staff_line: STAFF_LINE.to_string(),
        idle_timeout: Duration::from_secs(30),
        max_tool_rounds: 4,
        oracle_timeout: Duration::from_secs(5),
        oracle_retries: 0,
        transport_timeout: Duration::from_secs(1),
    }
}

fn records() -> Vec<Record> {
    vec![
        Record {
            id: RecordId("rec-smith".to_string()),
            full_name: "John Smith".to_string(),
            date_of_birth: date(1990, 1, 1),
            contact: ContactInfo { phone: Some("+15550100".to_string()), email: None },
            insurance_ref: None,
        },
        Record {
            id: RecordId("rec-rivera".to_string()),
            full_name: "Jordan Rivera".to_string(),
            date_of_birth: date(1985, 4, 12),
            contact: ContactInfo { phone: Some("+15550101".to_string()), email: None },
            insurance_ref: None,
        },
    ]
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, hour, 0, 0).single().expect("valid instant")
}

fn demo_store() -> InMemoryAvailabilityStore {
    let provider = ProviderId("dr-chen".to_string());
    InMemoryAvailabilityStore::new(
        vec![Provider { id: provider.clone(), display_name: "Dr. Sarah Chen".to_string() }],
        vec![Slot {
            id: SlotId("slot-a".to_string()),
            provider_id: provider,
            start: at(14),
            end: at(15),
            visit_type: VisitType::Routine,
            status: SlotStatus::Open,
            booked_by: None,
        }],
    )
}

fn harness(store: Arc<dyn AvailabilityStore>) -> Harness {
    let policy = ExternalCallPolicy { timeout: Duration::from_secs(5), retries: 1 };
    let lookup = Arc::new(InMemoryRecordLookup::with_records(records()));
    let notifications = RecordingNotificationGateway::default();
    let clock = PracticeClock::from_offset_minutes(-300, "Eastern Time").expect("clock");
    let audit = InMemoryAuditSink::default();
    let oracle = Arc::new(ScriptedOracle::default());
    let transport = Arc::new(BufferedTransport::new());

    let gate = Arc::new(VerificationGate::new(lookup.clone(), 3, policy));
    let scheduling = Arc::new(SchedulingOrchestrator::new(
        Arc::clone(&store),
        lookup.clone(),
        Arc::new(notifications.clone()),
        clock.clone(),
        policy,
    ));
    let services = SessionServices {
        flow: FlowEngine::default(),
        recorder: Arc::new(AuditRecorder::new(
            Arc::new(audit.clone()),
            BackoffPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 4 },
        )),
        tools: ToolExecutor::new(
            gate,
            scheduling,
            lookup,
            Arc::new(KnowledgeBase::default()),
            clock,
            policy,
        ),
        classifier: EmergencyClassifier::default(),
        oracle: oracle.clone(),
        transport: transport.clone(),
        archive: Arc::new(InMemorySessionRepository::default()),
        settings: settings(),
    };

    Harness {
        registry: SessionRegistry::new(services),
        oracle,
        transport,
        audit,
        store,
        notifications,
    }
}

async fn wait_for(
    registry: &SessionRegistry,
    session_id: &SessionId,
    predicate: impl Fn(&Session) -> bool,
) -> Session {
    let mut receiver = registry.subscribe(session_id).await.expect("live session");
    let session = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|s| predicate(s)))
        .await
        .expect("session reached the expected state in time")
        .expect("session actor is alive");
    session.clone()
}

fn agent_spoke_last(session: &Session) -> bool {
    session.transcript.last().map(|utterance| utterance.speaker == Speaker::Agent).unwrap_or(false)
}

async fn start_and_greet(harness: &Harness) -> SessionId {
    let session_id = harness.registry.start_call(None).await;
    wait_for(&harness.registry, &session_id, |session| {
        session.state == CallState::Greeting && agent_spoke_last(session)
    })
    .await;
    session_id
}

fn offered(request: &OracleRequest) -> Vec<String> {
    request
        .tools
        .iter()
        .filter_map(|tool| tool["function"]["name"].as_str().map(str::to_string))
        .collect()
}

fn event_types(audit: &InMemoryAuditSink, session_id: &SessionId) -> Vec<String> {
    audit
        .events()
        .into_iter()
        .filter(|event| &event.session_id == session_id)
        .map(|event| event.event_type)
        .collect()
}

fn tool_results(session: &Session, tool: &str) -> Vec<Value> {
    session
        .transcript
        .iter()
        .filter_map(|utterance| utterance.tool_call.as_ref())
        .filter(|call| call.tool == tool)
        .filter_map(|call| call.result.clone())
        .collect()
}

async fn verify_as_rivera(harness: &Harness, session_id: &SessionId) {
    harness.oracle.push(Ok(ScriptedOracle::call(
        "verify_identity",
        json!({ "name": "Jordan Rivera", "date_of_birth": "1985-04-12" }),
    )));
    harness.oracle.push(Ok(ScriptedOracle::say("Thanks, you're verified. What can I do for you?")));
    harness
        .registry
        .deliver_utterance(session_id, "This is Jordan Rivera, April 12 1985", true)
        .await
        .expect("deliver");
    wait_for(&harness.registry, session_id, |session| {
        session.state == CallState::Verified && agent_spoke_last(session)
    })
    .await;
}

#[tokio::test]
async fn fuzzy_name_claim_verifies_and_unlocks_phi_tools() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "verify_identity",
        json!({ "name": "Jon Smith", "date_of_birth": "1990-01-01" }),
    )));
    harness.oracle.push(Ok(ScriptedOracle::say("Thanks Jon, you're verified.")));
    let delivery = harness
        .registry
        .deliver_utterance(&session_id, "Hi, this is Jon Smith, born January first 1990", true)
        .await
        .expect("deliver");
    assert_eq!(delivery, Delivery::Queued);

    let session = wait_for(&harness.registry, &session_id, |session| {
        session.state == CallState::Verified && agent_spoke_last(session)
    })
    .await;

    assert_eq!(session.verified_record, Some(RecordId("rec-smith".to_string())));
    assert_eq!(tool_results(&session, "verify_identity"), vec![json!({ "verified": true })]);
    let identity_args = session
        .transcript
        .iter()
        .filter_map(|utterance| utterance.tool_call.as_ref())
        .map(|call| call.arguments.to_string())
        .collect::<String>();
    assert!(!identity_args.contains("1990-01-01"), "transcript keeps only redacted identity claims");

    let requests = harness.oracle.requests();
    assert_eq!(requests.len(), 2);
    assert!(offered(&requests[0]).contains(&"verify_identity".to_string()));
    assert!(!offered(&requests[0]).contains(&"book_appointment".to_string()));
    assert!(offered(&requests[1]).contains(&"book_appointment".to_string()));
    assert!(!offered(&requests[1]).contains(&"verify_identity".to_string()));
}

#[tokio::test]
async fn heart_attack_in_greeting_goes_straight_to_emergency() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    let delivery = harness
        .registry
        .deliver_utterance(&session_id, "I think I'm having a heart attack", true)
        .await
        .expect("deliver");
    assert_eq!(delivery, Delivery::Emergency { matched_phrase: "heart attack".to_string() });

    let session = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(session.state, CallState::Emergency);
    assert_eq!(session.outcome, Some(CallOutcome::Emergency));
    assert!(session.emergency_triggered);
    assert_eq!(session.verified_record, None);
    assert!(harness.oracle.requests().is_empty(), "no verification was attempted");

    let history = harness.transport.history(&session_id);
    let stop = history.iter().position(|command| *command == TransportCommand::StopAudio);
    let script = history
        .iter()
        .position(|command| *command == TransportCommand::Speak { text: EMERGENCY_SCRIPT.to_string() });
    let transfer = history
        .iter()
        .position(|command| *command == TransportCommand::Transfer { destination: "911".to_string() });
    assert!(stop < script && script < transfer, "stop, script, transfer in order: {history:?}");
    assert!(stop.is_some());
    let spoken = harness.transport.spoken(&session_id);
    assert_eq!(spoken.len(), 2, "greeting and emergency script only: {spoken:?}");

    let events = event_types(&harness.audit, &session_id);
    assert!(events.contains(&"emergency.detected".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("session.sealed"));
}

#[tokio::test]
async fn emergency_phrase_split_across_partials_is_caught() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    let first = harness
        .registry
        .deliver_utterance(&session_id, "my chest", false)
        .await
        .expect("first partial");
    let second = harness
        .registry
        .deliver_utterance(&session_id, "pain won't stop", false)
        .await
        .expect("second partial");

    assert_eq!(first, Delivery::Observed);
    assert_eq!(second, Delivery::Emergency { matched_phrase: "chest pain".to_string() });
    let session = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(session.outcome, Some(CallOutcome::Emergency));
}

#[tokio::test]
async fn booking_before_verification_is_denied_and_slot_untouched() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "book_appointment",
        json!({ "slot_id": "slot-a", "visit_type": "routine" }),
    )));
    harness.oracle.push(Ok(ScriptedOracle::say("I'll need your name and date of birth first.")));
    harness
        .registry
        .deliver_utterance(&session_id, "Just book me the two o'clock on Tuesday", true)
        .await
        .expect("deliver");

    let session = wait_for(&harness.registry, &session_id, |session| {
        session.state == CallState::Routing && agent_spoke_last(session)
    })
    .await;

    let denied = tool_results(&session, "book_appointment");
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0]["error"], "identity_not_verified");

    let slot = harness.store.slot(&SlotId("slot-a".to_string())).await.expect("read").expect("slot");
    assert_eq!(slot.status, SlotStatus::Open);
    assert_eq!(slot.booked_by, None);
    assert!(event_types(&harness.audit, &session_id).contains(&"gate.tool_denied".to_string()));
    assert!(!event_types(&harness.audit, &session_id).contains(&"tool.dispatched".to_string()));
    let booking_fillers = phrase_pool(ToolKind::BookAppointment);
    assert!(
        harness.transport.spoken(&session_id).iter().all(|text| !booking_fillers.contains(&text.as_str())),
        "a denied tool is never announced"
    );
}

#[tokio::test]
async fn confirmed_readback_counts_as_scheduled() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;
    verify_as_rivera(&harness, &session_id).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "book_appointment",
        json!({ "slot_id": "slot-a", "visit_type": "checkup" }),
    )));
    harness
        .registry
        .deliver_utterance(&session_id, "Tuesday at nine works, it's a check-up", true)
        .await
        .expect("deliver");
    let resolving = wait_for(&harness.registry, &session_id, |session| {
        session.state == CallState::Resolving && agent_spoke_last(session)
    })
    .await;
    let readback = resolving.transcript.last().map(|utterance| utterance.text.clone()).unwrap_or_default();
    assert!(readback.contains("Dr. Sarah Chen"), "readback names the provider: {readback}");
    assert!(readback.contains("9:00 AM Eastern Time"), "readback states local time: {readback}");
    assert!(resolving.confirmed_appointment.is_none(), "not confirmed before the caller agrees");

    let spoken = harness.transport.spoken(&session_id);
    let booking_filler = phrase_pool(ToolKind::BookAppointment)[0];
    let filler_at = spoken.iter().position(|text| text == booking_filler);
    let readback_at = spoken.iter().position(|text| text.contains("Dr. Sarah Chen"));
    assert!(filler_at.is_some() && filler_at < readback_at, "filler covers the booking: {spoken:?}");
    assert!(spoken.iter().any(|text| text == phrase_pool(ToolKind::VerifyIdentity)[0]));
    assert!(
        resolving.transcript.iter().all(|utterance| utterance.text != booking_filler),
        "fillers stay out of the transcript"
    );

    harness
        .registry
        .deliver_utterance(&session_id, "Yes, that's right", true)
        .await
        .expect("deliver");
    let confirmed = wait_for(&harness.registry, &session_id, |session| {
        session.confirmed_appointment.is_some()
    })
    .await;
    assert_eq!(harness.oracle.requests().len(), 3, "readback answers bypass the oracle");

    harness.registry.hangup(&session_id).await.expect("hangup");
    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(sealed.state, CallState::Abandoned);
    assert_eq!(sealed.outcome, Some(CallOutcome::Scheduled));
    assert_eq!(sealed.confirmed_appointment, confirmed.confirmed_appointment);

    let slot = harness.store.slot(&SlotId("slot-a".to_string())).await.expect("read").expect("slot");
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.booked_by, sealed.confirmed_appointment);
    assert_eq!(harness.notifications.sent().len(), 1);

    let events = event_types(&harness.audit, &session_id);
    assert!(events.contains(&"scheduling.appointment_booked".to_string()));
    assert!(events.contains(&"booking.confirmed".to_string()));
}

#[tokio::test]
async fn declined_readback_releases_the_slot() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;
    verify_as_rivera(&harness, &session_id).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "book_appointment",
        json!({ "slot_id": "slot-a", "visit_type": "routine" }),
    )));
    harness
        .registry
        .deliver_utterance(&session_id, "Book the Tuesday slot", true)
        .await
        .expect("deliver");
    let resolving =
        wait_for(&harness.registry, &session_id, |session| session.pending_readback.is_some()).await;
    let confirmation = resolving
        .pending_readback
        .as_ref()
        .map(|appointment| appointment.confirmation_id.clone())
        .expect("pending booking");

    harness.oracle.push(Ok(ScriptedOracle::say("No problem. Which day works better?")));
    harness
        .registry
        .deliver_utterance(&session_id, "No, that's the wrong day", true)
        .await
        .expect("deliver");
    let session = wait_for(&harness.registry, &session_id, |session| {
        session.state == CallState::Verified
            && session.pending_readback.is_none()
            && agent_spoke_last(session)
    })
    .await;
    assert!(session.confirmed_appointment.is_none());

    let slot = harness.store.slot(&SlotId("slot-a".to_string())).await.expect("read").expect("slot");
    assert_eq!(slot.status, SlotStatus::Open);
    let appointment = harness.store.appointment(&confirmation).await.expect("read").expect("kept");
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn transfer_during_readback_releases_the_unconfirmed_slot() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;
    verify_as_rivera(&harness, &session_id).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "book_appointment",
        json!({ "slot_id": "slot-a", "visit_type": "routine" }),
    )));
    harness
        .registry
        .deliver_utterance(&session_id, "Book the Tuesday slot", true)
        .await
        .expect("deliver");
    let resolving =
        wait_for(&harness.registry, &session_id, |session| session.pending_readback.is_some()).await;
    let confirmation = resolving
        .pending_readback
        .as_ref()
        .map(|appointment| appointment.confirmation_id.clone())
        .expect("pending booking");

    harness.registry.request_transfer(&session_id, "caller pressed 0").await.expect("transfer");
    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");

    assert_eq!(sealed.outcome, Some(CallOutcome::Transferred));
    assert!(sealed.confirmed_appointment.is_none());
    let slot = harness.store.slot(&SlotId("slot-a".to_string())).await.expect("read").expect("slot");
    assert_eq!(slot.status, SlotStatus::Open);
    let appointment = harness.store.appointment(&confirmation).await.expect("read").expect("kept");
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert!(event_types(&harness.audit, &session_id).contains(&"session.sealed".to_string()));
}

/// Holds `try_book` until the test releases it.
struct GatedStore {
    inner: InMemoryAvailabilityStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl AvailabilityStore for GatedStore {
    async fn providers(&self) -> Result<Vec<Provider>, StoreError> {
        self.inner.providers().await
    }

    async fn open_slots(
        &self,
        provider_id: &ProviderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        self.inner.open_slots(provider_id, from, until).await
    }

    async fn slot(&self, slot_id: &SlotId) -> Result<Option<Slot>, StoreError> {
        self.inner.slot(slot_id).await
    }

    async fn try_book(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.try_book(appointment).await
    }

    async fn cancel(&self, confirmation_id: &ConfirmationId) -> Result<Appointment, StoreError> {
        self.inner.cancel(confirmation_id).await
    }

    async fn appointment(
        &self,
        confirmation_id: &ConfirmationId,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner.appointment(confirmation_id).await
    }
}

fn gated_store() -> Arc<GatedStore> {
    Arc::new(GatedStore { inner: demo_store(), entered: Notify::new(), release: Notify::new() })
}

async fn start_booking_in_flight(harness: &Harness, gated: &GatedStore) -> SessionId {
    let session_id = start_and_greet(harness).await;
    verify_as_rivera(harness, &session_id).await;

    harness.oracle.push(Ok(ScriptedOracle::call(
        "book_appointment",
        json!({ "slot_id": "slot-a", "visit_type": "routine" }),
    )));
    harness.oracle.push(Ok(ScriptedOracle::say("This reply must never be requested.")));
    harness
        .registry
        .deliver_utterance(&session_id, "Book the Tuesday slot please", true)
        .await
        .expect("deliver");
    tokio::time::timeout(Duration::from_secs(5), gated.entered.notified())
        .await
        .expect("booking reached the store");
    session_id
}

async fn wait_for_slot_status(store: &dyn AvailabilityStore, expected: SlotStatus) -> Slot {
    for _ in 0..200 {
        let slot = store.slot(&SlotId("slot-a".to_string())).await.expect("read").expect("slot");
        if slot.status == expected {
            return slot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slot never reached {expected:?}");
}

#[tokio::test]
async fn hangup_mid_booking_abandons_even_if_the_booking_lands() {
    let gated = gated_store();
    let harness = harness(gated.clone());
    let session_id = start_booking_in_flight(&harness, &gated).await;

    harness.registry.hangup(&session_id).await.expect("hangup");
    let sealed = tokio::time::timeout(
        Duration::from_secs(5),
        harness.registry.wait_until_sealed(&session_id),
    )
    .await
    .expect("session did not wait on the booking")
    .expect("sealed");

    assert_eq!(sealed.state, CallState::Abandoned);
    assert_eq!(sealed.abandon_reason, Some(AbandonReason::CallerHangup));
    assert_eq!(sealed.outcome, Some(CallOutcome::Abandoned));

    gated.release.notify_one();
    let slot = wait_for_slot_status(gated.as_ref(), SlotStatus::Booked).await;
    assert!(slot.booked_by.is_some(), "booking still completed server-side");

    let archived = harness.registry.snapshot(&session_id).await.expect("archived");
    assert_eq!(archived.outcome, Some(CallOutcome::Abandoned));
    assert!(archived.confirmed_appointment.is_none());
}

#[tokio::test]
async fn emergency_during_booking_stops_further_tool_calls() {
    let gated = gated_store();
    let harness = harness(gated.clone());
    let session_id = start_booking_in_flight(&harness, &gated).await;
    let requests_before = harness.oracle.requests().len();

    let delivery = harness
        .registry
        .deliver_utterance(&session_id, "wait, I can't breathe", false)
        .await
        .expect("deliver");
    assert!(matches!(delivery, Delivery::Emergency { .. }));

    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(sealed.state, CallState::Emergency);
    assert_eq!(sealed.outcome, Some(CallOutcome::Emergency));
    assert!(harness.transport.transfers(&session_id).contains(&"911".to_string()));

    gated.release.notify_one();
    wait_for_slot_status(gated.as_ref(), SlotStatus::Booked).await;
    assert_eq!(harness.oracle.requests().len(), requests_before);
}

#[tokio::test]
async fn repeated_failed_identity_claims_transfer_to_staff() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    for _ in 0..3 {
        harness.oracle.push(Ok(ScriptedOracle::call(
            "verify_identity",
            json!({ "name": "Alex Nobody", "date_of_birth": "2001-02-03" }),
        )));
    }
    harness
        .registry
        .deliver_utterance(&session_id, "I'm Alex Nobody, February third 2001", true)
        .await
        .expect("deliver");

    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(sealed.state, CallState::Transferred);
    assert_eq!(sealed.outcome, Some(CallOutcome::Transferred));
    assert_eq!(sealed.verification_failures, 3);
    assert_eq!(sealed.verified_record, None);
    assert_eq!(harness.transport.transfers(&session_id), vec![STAFF_LINE.to_string()]);

    let failures = tool_results(&sealed, "verify_identity");
    assert_eq!(failures[0]["error"], "no_match");
    assert_eq!(failures[0]["attempts_remaining"], 2);
    assert_eq!(failures[2]["error"], "verification_exhausted");
}

#[tokio::test]
async fn oracle_outage_degrades_to_staff_transfer() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    harness
        .registry
        .deliver_utterance(&session_id, "What are your hours?", true)
        .await
        .expect("deliver");

    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(sealed.outcome, Some(CallOutcome::Transferred));
    assert!(harness
        .transport
        .spoken(&session_id)
        .iter()
        .any(|text| text.contains("connect you with our staff")));
}

#[tokio::test]
async fn caller_transfer_request_ends_the_call_transferred() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    harness.registry.request_transfer(&session_id, "caller pressed 0").await.expect("transfer");
    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");

    assert_eq!(sealed.outcome, Some(CallOutcome::Transferred));
    assert_eq!(harness.transport.transfers(&session_id), vec![STAFF_LINE.to_string()]);
}

#[tokio::test]
async fn audit_outage_fails_closed_and_tags_the_session() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;

    harness.audit.fail_next_appends(1_000);
    harness
        .registry
        .deliver_utterance(&session_id, "Hello?", true)
        .await
        .expect("deliver");

    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");
    assert_eq!(sealed.state, CallState::Abandoned);
    assert_eq!(sealed.abandon_reason, Some(AbandonReason::AuditFailure));
    assert_eq!(sealed.outcome, Some(CallOutcome::Abandoned));
    assert!(harness.oracle.requests().is_empty(), "nothing runs past a failed audit write");
    assert_eq!(harness.transport.transfers(&session_id), vec![STAFF_LINE.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn silent_caller_is_abandoned_after_idle_timeout() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = harness.registry.start_call(None).await;

    let sealed = harness.registry.wait_until_sealed(&session_id).await.expect("sealed");

    assert_eq!(sealed.state, CallState::Abandoned);
    assert_eq!(sealed.abandon_reason, Some(AbandonReason::IdleTimeout));
    assert_eq!(sealed.outcome, Some(CallOutcome::Abandoned));
}

#[tokio::test]
async fn sealed_and_unknown_sessions_reject_input() {
    let harness = harness(Arc::new(demo_store()));
    let session_id = start_and_greet(&harness).await;
    harness.registry.hangup(&session_id).await.expect("hangup");
    harness.registry.wait_until_sealed(&session_id).await.expect("sealed");

    let late = harness.registry.deliver_utterance(&session_id, "hello?", true).await;
    assert_eq!(late, Err(CallError::SessionSealed { session_id: session_id.clone() }));

    let unknown = SessionId("no-such-call".to_string());
    assert_eq!(
        harness.registry.hangup(&unknown).await,
        Err(CallError::SessionNotFound { session_id: unknown.clone() })
    );
    assert_eq!(harness.registry.live_sessions().await, 0);
}
