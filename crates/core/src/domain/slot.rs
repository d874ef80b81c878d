use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::appointment::ConfirmationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    Routine,
    Urgent,
    Checkup,
    Followup,
}

impl VisitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Urgent => "urgent",
            Self::Checkup => "checkup",
            Self::Followup => "followup",
        }
    }

    /// Accepts the storage code plus the spoken variants callers use.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "routine" => Some(Self::Routine),
            "urgent" | "sick visit" => Some(Self::Urgent),
            "checkup" | "check up" | "annual" | "physical" => Some(Self::Checkup),
            "followup" | "follow up" => Some(Self::Followup),
            _ => None,
        }
    }

    pub fn spoken(&self) -> &'static str {
        match self {
            Self::Routine => "routine visit",
            Self::Urgent => "same-day sick visit",
            Self::Checkup => "check-up",
            Self::Followup => "follow-up visit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Open,
    /// Taken out of circulation by staff; not bookable by callers.
    Held,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Held => "held",
            Self::Booked => "booked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "held" => Some(Self::Held),
            "booked" => Some(Self::Booked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub provider_id: ProviderId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub visit_type: VisitType,
    pub status: SlotStatus,
    pub booked_by: Option<ConfirmationId>,
}

impl Slot {
    /// Routine slots take any non-urgent visit; other slots only their own type.
    pub fn accepts(&self, visit_type: VisitType) -> bool {
        self.visit_type == visit_type
            || (self.visit_type == VisitType::Routine && visit_type != VisitType::Urgent)
    }
}
