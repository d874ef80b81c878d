use std::sync::Arc;

use chrono::NaiveDate;

use frontdesk_core::domain::session::{CallState, SessionId};
use frontdesk_core::domain::slot::{ProviderId, SlotStatus, VisitType};
use frontdesk_core::errors::CallError;
use frontdesk_core::gate::{AuthorizedTool, VerificationGate};
use frontdesk_core::notification::RecordingNotificationGateway;
use frontdesk_core::records::InMemoryRecordLookup;
use frontdesk_core::retry::ExternalCallPolicy;
use frontdesk_core::scheduling::{AvailabilityStore, PracticeClock, SchedulingOrchestrator};
use frontdesk_core::tools::ToolRequest;
use frontdesk_db::{connect_with_settings, migrations, DemoPractice, SqlAvailabilityStore};

type ContractResult<T = ()> = Result<T, String>;

struct Contract {
    store: Arc<SqlAvailabilityStore>,
    gate: VerificationGate,
    orchestrator: SchedulingOrchestrator,
}

async fn seeded_orchestrator() -> ContractResult<Contract> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;

    let clock = PracticeClock::from_offset_minutes(-300, "Eastern Time")
        .ok_or_else(|| "offset should be valid".to_string())?;
    let monday = NaiveDate::from_ymd_opt(2026, 3, 2).ok_or_else(|| "date".to_string())?;
    DemoPractice::load(&pool, monday, 5, &clock)
        .await
        .map_err(|error| format!("seed: {error}"))?;

    let store = Arc::new(SqlAvailabilityStore::new(pool));
    let records = Arc::new(InMemoryRecordLookup::with_records(DemoPractice::records()));
    let gate = VerificationGate::new(records.clone(), 3, ExternalCallPolicy::default());
    let orchestrator = SchedulingOrchestrator::new(
        store.clone(),
        records,
        Arc::new(RecordingNotificationGateway::default()),
        clock,
        ExternalCallPolicy::default(),
    );
    Ok(Contract { store, gate, orchestrator })
}

/// Verifies the first demo caller on `session` and authorizes one booking.
async fn booking_token(
    gate: &VerificationGate,
    session: &str,
    request: ToolRequest,
) -> ContractResult<AuthorizedTool> {
    let record = DemoPractice::records()
        .into_iter()
        .next()
        .ok_or_else(|| "demo records should not be empty".to_string())?;
    let session_id = SessionId(session.to_string());
    gate.verify(&session_id, &record.full_name, &record.date_of_birth.to_string())
        .await
        .map_err(|error| format!("verify: {error}"))?;
    gate.authorize(&session_id, CallState::Verified, request)
        .map_err(|error| format!("authorize: {error}"))
}

#[tokio::test]
async fn sql_backed_booking_follows_the_check_and_set_contract() -> ContractResult {
    let Contract { store, gate, orchestrator } = seeded_orchestrator().await?;
    let provider = ProviderId("dr-chen".to_string());
    let tuesday = NaiveDate::from_ymd_opt(2026, 3, 3).ok_or_else(|| "date".to_string())?;

    let slots = orchestrator
        .get_availability(&provider, tuesday, tuesday, Some(VisitType::Checkup))
        .await
        .map_err(|error| format!("availability: {error}"))?;
    let target = slots.first().ok_or_else(|| "expected at least one slot".to_string())?.clone();

    let request =
        ToolRequest::BookAppointment { slot_id: target.id.clone(), visit_type: VisitType::Checkup };
    let first = booking_token(&gate, "call-contract-1", request.clone()).await?;
    let receipt = orchestrator.book(&first).await.map_err(|error| format!("booking: {error}"))?;

    if receipt.readback.provider_name != "Dr. Sarah Chen" {
        return Err(format!("unexpected provider name {}", receipt.readback.provider_name));
    }
    let stored = store
        .slot(&target.id)
        .await
        .map_err(|error| format!("slot read: {error}"))?
        .ok_or_else(|| "slot should exist".to_string())?;
    if stored.status != SlotStatus::Booked {
        return Err("slot should be booked".to_string());
    }

    let second_token = booking_token(&gate, "call-contract-2", request).await?;
    let second = orchestrator.book(&second_token).await;
    match second {
        Err(CallError::SlotConflict { .. }) => {}
        other => return Err(format!("second booking should conflict, got {other:?}")),
    }

    let after = orchestrator
        .get_availability(&provider, tuesday, tuesday, Some(VisitType::Checkup))
        .await
        .map_err(|error| format!("availability: {error}"))?;
    if after.iter().any(|slot| slot.id == target.id) {
        return Err("booked slot should no longer be offered".to_string());
    }
    Ok(())
}
