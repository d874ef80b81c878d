use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::record::RecordId;
use crate::domain::slot::{ProviderId, SlotId, VisitType};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfirmationId(pub String);

const CONFIRMATION_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

impl ConfirmationId {
    /// Eight characters from an alphabet without look-alikes (no 0/O, 1/I),
    /// so the code can be read aloud.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..8)
            .map(|_| {
                let index = rng.gen_range(0..CONFIRMATION_ALPHABET.len());
                char::from(CONFIRMATION_ALPHABET[index])
            })
            .collect();
        Self(format!("FD-{code}"))
    }
}

impl std::fmt::Display for ConfirmationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "booked" => Some(Self::Booked),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub confirmation_id: ConfirmationId,
    pub slot_id: SlotId,
    pub record_id: RecordId,
    pub provider_id: ProviderId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub visit_type: VisitType,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        match self.status {
            AppointmentStatus::Booked => {
                self.status = AppointmentStatus::Cancelled;
                Ok(())
            }
            AppointmentStatus::Cancelled => Err(DomainError::InvariantViolation(format!(
                "appointment {} is already cancelled",
                self.confirmation_id
            ))),
        }
    }
}

/// Structured booking details the agent must recite before the booking
/// counts as confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readback {
    pub confirmation_id: ConfirmationId,
    pub provider_id: ProviderId,
    pub provider_name: String,
    pub start_local: DateTime<FixedOffset>,
    pub timezone_label: String,
    pub visit_type: VisitType,
}

impl Readback {
    pub fn script(&self) -> String {
        format!(
            "I have you booked with {} on {} at {} {} for a {}. Is that correct?",
            self.provider_name,
            self.start_local.format("%A, %B %-d"),
            self.start_local.format("%-I:%M %p"),
            self.timezone_label,
            self.visit_type.spoken()
        )
    }
}
