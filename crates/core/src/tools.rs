//! Closed registry of tools the oracle may request.
//!
//! Every tool carries its authorization class as static metadata. The
//! verification gate reads that class; nothing infers it at call time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::slot::{ProviderId, SlotId, VisitType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Knowledge and call-control tools; never need verification.
    Public,
    /// Collects identity claims; only before verification.
    IdentityCollection,
    /// Returns or requires protected health information.
    PhiBearing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    VerifyIdentity,
    SearchKnowledgeBase,
    TransferToStaff,
    EndCall,
    ListProviders,
    GetAvailability,
    BookAppointment,
    CheckInsurance,
}

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        ToolKind::VerifyIdentity,
        ToolKind::SearchKnowledgeBase,
        ToolKind::TransferToStaff,
        ToolKind::EndCall,
        ToolKind::ListProviders,
        ToolKind::GetAvailability,
        ToolKind::BookAppointment,
        ToolKind::CheckInsurance,
    ];

    pub const fn classification(&self) -> ToolClass {
        match self {
            Self::VerifyIdentity => ToolClass::IdentityCollection,
            Self::SearchKnowledgeBase | Self::TransferToStaff | Self::EndCall => ToolClass::Public,
            Self::ListProviders
            | Self::GetAvailability
            | Self::BookAppointment
            | Self::CheckInsurance => ToolClass::PhiBearing,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::VerifyIdentity => "verify_identity",
            Self::SearchKnowledgeBase => "search_knowledge_base",
            Self::TransferToStaff => "transfer_to_staff",
            Self::EndCall => "end_call",
            Self::ListProviders => "list_providers",
            Self::GetAvailability => "get_availability",
            Self::BookAppointment => "book_appointment",
            Self::CheckInsurance => "check_insurance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Function-calling schema handed to the oracle.
    pub fn schema(&self) -> Value {
        let (description, parameters) = match self {
            Self::VerifyIdentity => (
                "Verify the caller's identity from their full name and date of birth. Required before any patient-specific tool.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Caller's full name" },
                        "date_of_birth": { "type": "string", "description": "YYYY-MM-DD" }
                    },
                    "required": ["name", "date_of_birth"]
                }),
            ),
            Self::SearchKnowledgeBase => (
                "Answer general questions about the practice (hours, location, insurance accepted, policies).",
                json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }),
            ),
            Self::TransferToStaff => (
                "Transfer the caller to front-desk staff, e.g. for clinical questions or when asked.",
                json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } },
                    "required": ["reason"]
                }),
            ),
            Self::EndCall => (
                "End the call once the caller has nothing else to ask.",
                json!({ "type": "object", "properties": {}, "required": [] }),
            ),
            Self::ListProviders => (
                "List the providers the caller can book with.",
                json!({ "type": "object", "properties": {}, "required": [] }),
            ),
            Self::GetAvailability => (
                "List open appointment slots for a provider in a date range.",
                json!({
                    "type": "object",
                    "properties": {
                        "provider_id": { "type": "string" },
                        "start_date": { "type": "string", "description": "YYYY-MM-DD" },
                        "end_date": { "type": "string", "description": "YYYY-MM-DD" },
                        "visit_type": { "type": "string", "enum": ["routine", "urgent", "checkup", "followup"] }
                    },
                    "required": ["provider_id", "start_date", "end_date"]
                }),
            ),
            Self::BookAppointment => (
                "Book a slot for the verified caller. The details are read back to the caller afterwards.",
                json!({
                    "type": "object",
                    "properties": {
                        "slot_id": { "type": "string" },
                        "visit_type": { "type": "string", "enum": ["routine", "urgent", "checkup", "followup"] }
                    },
                    "required": ["slot_id", "visit_type"]
                }),
            ),
            Self::CheckInsurance => (
                "Check the verified caller's insurance coverage against a plan.",
                json!({
                    "type": "object",
                    "properties": { "plan_id": { "type": "string" } },
                    "required": ["plan_id"]
                }),
            ),
        };

        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": description,
                "parameters": parameters
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    VerifyIdentity {
        name: String,
        date_of_birth: String,
    },
    SearchKnowledgeBase {
        query: String,
    },
    TransferToStaff {
        reason: String,
    },
    EndCall {},
    ListProviders {},
    GetAvailability {
        provider_id: ProviderId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        #[serde(default)]
        visit_type: Option<VisitType>,
    },
    BookAppointment {
        slot_id: SlotId,
        visit_type: VisitType,
    },
    CheckInsurance {
        plan_id: String,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolParseError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolParseError {
    pub fn to_result(&self) -> Value {
        json!({ "error": "invalid_tool_call", "message": self.to_string() })
    }
}

impl ToolRequest {
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolParseError> {
        if ToolKind::from_name(name).is_none() {
            return Err(ToolParseError::UnknownTool(name.to_string()));
        }
        // Oracles emit `{}` or `null` interchangeably for argument-less tools.
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(|error| {
            // serde quotes the offending value, which for identity calls is PHI.
            let message = if name == ToolKind::VerifyIdentity.name() {
                "expected string fields `name` and `date_of_birth`".to_string()
            } else {
                error.to_string()
            };
            ToolParseError::InvalidArguments { tool: name.to_string(), message }
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::VerifyIdentity { .. } => ToolKind::VerifyIdentity,
            Self::SearchKnowledgeBase { .. } => ToolKind::SearchKnowledgeBase,
            Self::TransferToStaff { .. } => ToolKind::TransferToStaff,
            Self::EndCall {} => ToolKind::EndCall,
            Self::ListProviders {} => ToolKind::ListProviders,
            Self::GetAvailability { .. } => ToolKind::GetAvailability,
            Self::BookAppointment { .. } => ToolKind::BookAppointment,
            Self::CheckInsurance { .. } => ToolKind::CheckInsurance,
        }
    }

    /// Arguments safe to keep in the transcript and audit log.
    pub fn redacted_arguments(&self) -> Value {
        match self {
            Self::VerifyIdentity { .. } => {
                json!({ "name": "[redacted]", "date_of_birth": "[redacted]" })
            }
            other => serde_json::to_value(other)
                .ok()
                .and_then(|value| value.get("arguments").cloned())
                .unwrap_or(Value::Null),
        }
    }
}
