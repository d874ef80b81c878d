use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::appointment::{ConfirmationId, Readback};
use crate::domain::record::ContactInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    AppointmentBooked,
    AppointmentCancelled,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentBooked => "appointment_booked",
            Self::AppointmentCancelled => "appointment_cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient: ContactInfo,
    pub template: NotificationTemplate,
    pub appointment_ref: ConfirmationId,
    pub body: String,
}

impl NotificationRequest {
    pub fn booked(recipient: ContactInfo, readback: &Readback) -> Self {
        let body = format!(
            "Your {} with {} is booked for {} {}. Confirmation {}.",
            readback.visit_type.spoken(),
            readback.provider_name,
            readback.start_local.format("%A, %B %-d at %-I:%M %p"),
            readback.timezone_label,
            readback.confirmation_id,
        );
        Self {
            recipient,
            template: NotificationTemplate::AppointmentBooked,
            appointment_ref: readback.confirmation_id.clone(),
            body,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("recipient has no reachable contact")]
    NoContact,
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Best-effort delivery. Callers log failures and never surface them.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}

/// Writes the dispatch to the log only.
#[derive(Clone, Debug, Default)]
pub struct LoggingNotificationGateway;

#[async_trait]
impl NotificationGateway for LoggingNotificationGateway {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        if request.recipient.phone.is_none() && request.recipient.email.is_none() {
            return Err(NotificationError::NoContact);
        }
        info!(
            event_name = "notification.logged",
            template = request.template.as_str(),
            appointment_ref = %request.appointment_ref,
        );
        Ok(())
    }
}

/// Keeps every request; used by tests and local runs.
#[derive(Clone, Default)]
pub struct RecordingNotificationGateway {
    sent: Arc<Mutex<Vec<NotificationRequest>>>,
}

impl RecordingNotificationGateway {
    pub fn sent(&self) -> Vec<NotificationRequest> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotificationGateway {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        Ok(())
    }
}
