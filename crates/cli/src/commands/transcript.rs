use frontdesk_core::{verify_chain, AuditEvent, AuditSink, ChainVerification, Session, SessionId};
use frontdesk_db::{SessionRepository, SqlAuditSink, SqlSessionRepository};
use serde_json::{json, Value};

use crate::commands::{connect, load_config, runtime, CommandResult, StepFailure};

/// Audit read-back for one call, with chain verification and the archived
/// transcript when the session has sealed.
pub fn run(session_id: &str) -> CommandResult {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return CommandResult::failure("transcript", "invalid_argument", "session id is required", 2);
    }
    let config = match load_config("transcript") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("transcript") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let session_id = SessionId(session_id.to_string());
    let result = runtime.block_on(async {
        let pool = connect(&config).await?;
        let events = SqlAuditSink::new(pool.clone())
            .events_for_session(&session_id)
            .await
            .map_err(|error| ("audit_readback", error.to_string(), 5u8));
        let archived = SqlSessionRepository::new(pool.clone())
            .find_by_id(&session_id)
            .await
            .map_err(|error| ("session_readback", error.to_string(), 5u8));
        pool.close().await;
        Ok::<_, StepFailure>((events?, archived?))
    });

    let (events, archived) = match result {
        Ok(found) => found,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("transcript", error_class, message, exit_code);
        }
    };
    if events.is_empty() && archived.is_none() {
        return CommandResult::failure(
            "transcript",
            "not_found",
            format!("no audit events recorded for session {session_id}"),
            7,
        );
    }

    let chain = verify_chain(&events);
    let details = report(&events, &chain, archived.as_ref());
    if !chain.valid {
        return CommandResult::failure(
            "transcript",
            "chain_invalid",
            chain.failure_reason.unwrap_or_else(|| "audit chain failed verification".to_string()),
            8,
        );
    }

    CommandResult::success_with_details(
        "transcript",
        format!("{} audit events verified for session {session_id}", chain.verified_events),
        Some(details),
    )
}

fn report(events: &[AuditEvent], chain: &ChainVerification, archived: Option<&Session>) -> Value {
    let audit: Vec<Value> = events
        .iter()
        .map(|event| {
            json!({
                "sequence": event.sequence,
                "occurred_at": event.occurred_at.to_rfc3339(),
                "event_type": event.event_type,
                "actor": event.actor.as_str(),
                "outcome": event.outcome.as_str(),
                "metadata": event.metadata,
            })
        })
        .collect();

    let transcript: Vec<Value> = archived
        .map(|session| {
            session
                .transcript
                .iter()
                .filter(|utterance| utterance.tool_call.is_none())
                .map(|utterance| {
                    json!({
                        "at": utterance.at.to_rfc3339(),
                        "speaker": utterance.speaker,
                        "text": utterance.text,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "chain": chain,
        "outcome": archived.and_then(|session| session.outcome),
        "final_state": archived.map(|session| session.state),
        "audit": audit,
        "transcript": transcript,
    })
}
