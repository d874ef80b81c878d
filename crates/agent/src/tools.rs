//! Tool execution. Only [`AuthorizedTool`] tokens reach this module, so every
//! dispatch here has already passed the verification gate.

use std::sync::Arc;

use frontdesk_core::records::RecordLookup;
use frontdesk_core::retry::{call_external, ExternalCallPolicy};
use frontdesk_core::{
    AuthorizedTool, BookingReceipt, CallError, KnowledgeBase, PracticeClock, RecordId,
    SchedulingOrchestrator, SessionId, Slot, ToolRequest, VerificationGate,
};
use serde_json::{json, Value};

/// Upper bound on slots handed back to the oracle per availability query.
pub const MAX_OFFERED_SLOTS: usize = 12;

/// What a dispatched tool produced. The session actor turns this into
/// transitions and transcript entries; dispatch itself never touches the
/// session.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    Verified { record_id: RecordId },
    Answer { result: Value },
    Booked(BookingReceipt),
    Transfer { reason: String },
    EndCall,
    Failed(CallError),
}

impl ToolOutcome {
    /// Tool result as the oracle sees it. Identity outcomes carry no record
    /// data.
    pub fn oracle_result(&self) -> Value {
        match self {
            Self::Verified { .. } => json!({ "verified": true }),
            Self::Answer { result } => result.clone(),
            Self::Booked(receipt) => json!({
                "booked": true,
                "confirmation_id": receipt.appointment.confirmation_id,
                "readback": receipt.readback.script(),
            }),
            Self::Transfer { reason } => json!({ "transferring": true, "reason": reason }),
            Self::EndCall => json!({ "ending_call": true }),
            Self::Failed(error) => failure_result(error),
        }
    }
}

pub fn failure_result(error: &CallError) -> Value {
    let mut result = json!({
        "error": error.reason_code(),
        "message": error.user_message(),
    });
    match error {
        CallError::AmbiguousIdentity { attempts_remaining, .. }
        | CallError::NoMatch { attempts_remaining } => {
            result["attempts_remaining"] = json!(attempts_remaining);
        }
        _ => {}
    }
    result
}

/// Shared collaborators for tool execution. Cheap to clone into a task.
#[derive(Clone)]
pub struct ToolExecutor {
    gate: Arc<VerificationGate>,
    scheduling: Arc<SchedulingOrchestrator>,
    records: Arc<dyn RecordLookup>,
    knowledge: Arc<KnowledgeBase>,
    clock: PracticeClock,
    policy: ExternalCallPolicy,
}

impl ToolExecutor {
    pub fn new(
        gate: Arc<VerificationGate>,
        scheduling: Arc<SchedulingOrchestrator>,
        records: Arc<dyn RecordLookup>,
        knowledge: Arc<KnowledgeBase>,
        clock: PracticeClock,
        policy: ExternalCallPolicy,
    ) -> Self {
        Self { gate, scheduling, records, knowledge, clock, policy }
    }

    pub fn gate(&self) -> &Arc<VerificationGate> {
        &self.gate
    }

    pub fn scheduling(&self) -> &Arc<SchedulingOrchestrator> {
        &self.scheduling
    }

    pub fn clock(&self) -> &PracticeClock {
        &self.clock
    }

    pub async fn dispatch(&self, session_id: &SessionId, tool: AuthorizedTool) -> ToolOutcome {
        match tool.request().clone() {
            ToolRequest::VerifyIdentity { name, date_of_birth } => {
                match self.gate.verify(session_id, &name, &date_of_birth).await {
                    Ok(record_id) => ToolOutcome::Verified { record_id },
                    Err(error) => ToolOutcome::Failed(error),
                }
            }
            ToolRequest::SearchKnowledgeBase { query } => ToolOutcome::Answer {
                result: serde_json::to_value(self.knowledge.search(&query)).unwrap_or(Value::Null),
            },
            ToolRequest::TransferToStaff { reason } => ToolOutcome::Transfer { reason },
            ToolRequest::EndCall {} => ToolOutcome::EndCall,
            ToolRequest::ListProviders {} => match self.scheduling.providers().await {
                Ok(providers) => ToolOutcome::Answer {
                    result: json!({
                        "providers": providers
                            .iter()
                            .map(|provider| json!({ "provider_id": provider.id, "name": provider.display_name }))
                            .collect::<Vec<_>>(),
                    }),
                },
                Err(error) => ToolOutcome::Failed(error),
            },
            ToolRequest::GetAvailability { provider_id, start_date, end_date, visit_type } => {
                match self
                    .scheduling
                    .get_availability(&provider_id, start_date, end_date, visit_type)
                    .await
                {
                    Ok(slots) => ToolOutcome::Answer { result: self.availability_result(&slots) },
                    Err(error) => ToolOutcome::Failed(error),
                }
            }
            ToolRequest::BookAppointment { .. } => match self.scheduling.book(&tool).await {
                Ok(receipt) => ToolOutcome::Booked(receipt),
                Err(error) => ToolOutcome::Failed(error),
            },
            ToolRequest::CheckInsurance { plan_id } => {
                let Some(record_id) = tool.record() else {
                    return ToolOutcome::Failed(CallError::GateDenied { tool: tool.kind() });
                };
                self.check_insurance(record_id, &plan_id).await
            }
        }
    }

    async fn check_insurance(&self, record_id: &RecordId, plan_id: &str) -> ToolOutcome {
        let records = Arc::clone(&self.records);
        let coverage = call_external("check_insurance", &self.policy, || {
            let records = Arc::clone(&records);
            let record_id = record_id.clone();
            let plan_id = plan_id.to_owned();
            async move { records.coverage(&record_id, &plan_id).await }
        })
        .await;

        match coverage {
            Ok(Some(coverage)) => ToolOutcome::Answer {
                result: json!({
                    "plan_id": coverage.plan_id,
                    "payor": coverage.payor,
                    "status": coverage.status,
                }),
            },
            Ok(None) => ToolOutcome::Answer {
                result: json!({ "plan_id": plan_id, "status": "not_on_file" }),
            },
            Err(_) => ToolOutcome::Failed(CallError::ExternalTimeout {
                operation: "check_insurance".to_owned(),
            }),
        }
    }

    fn availability_result(&self, slots: &[Slot]) -> Value {
        let offered: Vec<Value> = slots
            .iter()
            .take(MAX_OFFERED_SLOTS)
            .map(|slot| {
                let local = slot.start.with_timezone(&self.clock.offset);
                json!({
                    "slot_id": slot.id,
                    "start": local.to_rfc3339(),
                    "spoken": format!("{} {}", local.format("%A, %B %-d at %-I:%M %p"), self.clock.label),
                    "visit_type": slot.visit_type,
                })
            })
            .collect();
        json!({ "total_open": slots.len(), "slots": offered })
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::{CallError, SlotId};

    use super::{failure_result, ToolOutcome};

    #[test]
    fn failures_carry_reason_and_remaining_attempts() {
        let result = failure_result(&CallError::NoMatch { attempts_remaining: 2 });
        assert_eq!(result["error"], "no_match");
        assert_eq!(result["attempts_remaining"], 2);

        let conflict = ToolOutcome::Failed(CallError::SlotConflict { slot_id: SlotId("slot-1".to_owned()) });
        assert_eq!(conflict.oracle_result()["error"], "slot_conflict");
        assert!(conflict.oracle_result().get("attempts_remaining").is_none());
    }

    #[test]
    fn verified_result_contains_no_record_data() {
        let outcome = ToolOutcome::Verified { record_id: frontdesk_core::RecordId("rec-1001".to_owned()) };
        assert_eq!(outcome.oracle_result(), serde_json::json!({ "verified": true }));
    }
}
