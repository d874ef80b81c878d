use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::appointment::{Appointment, AppointmentStatus, ConfirmationId, Readback};
use crate::domain::record::RecordId;
use crate::domain::session::{CallState, SessionId};
use crate::domain::slot::{Provider, ProviderId, Slot, SlotId, SlotStatus, VisitType};
use crate::errors::CallError;
use crate::gate::AuthorizedTool;
use crate::notification::{NotificationGateway, NotificationRequest};
use crate::records::RecordLookup;
use crate::retry::{call_external, ExternalCallPolicy, Transient};
use crate::tools::{ToolKind, ToolRequest};

const CONFIRMATION_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("slot {slot_id} is not open")]
    Conflict { slot_id: SlotId },
    #[error("slot {slot_id} does not exist")]
    NotFound { slot_id: SlotId },
    #[error("confirmation id {0} already issued")]
    DuplicateConfirmation(ConfirmationId),
    #[error("appointment {0} does not exist")]
    AppointmentNotFound(ConfirmationId),
    #[error("availability store unavailable: {0}")]
    Unavailable(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Slot storage. `try_book` is the only way a slot leaves `open`, and it is a
/// check-and-set: of any number of concurrent callers exactly one succeeds.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn providers(&self) -> Result<Vec<Provider>, StoreError>;

    async fn open_slots(
        &self,
        provider_id: &ProviderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError>;

    async fn slot(&self, slot_id: &SlotId) -> Result<Option<Slot>, StoreError>;

    /// Flips the slot open -> booked and stores the appointment in one step.
    async fn try_book(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Cancels the appointment and reopens its slot.
    async fn cancel(&self, confirmation_id: &ConfirmationId) -> Result<Appointment, StoreError>;

    async fn appointment(
        &self,
        confirmation_id: &ConfirmationId,
    ) -> Result<Option<Appointment>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    providers: Vec<Provider>,
    slots: HashMap<SlotId, Arc<Mutex<Slot>>>,
    appointments: Mutex<HashMap<ConfirmationId, Appointment>>,
}

impl InMemoryAvailabilityStore {
    pub fn new(providers: Vec<Provider>, slots: Vec<Slot>) -> Self {
        let slots =
            slots.into_iter().map(|slot| (slot.id.clone(), Arc::new(Mutex::new(slot)))).collect();
        Self { providers, slots, appointments: Mutex::new(HashMap::new()) }
    }

    fn slot_cell(&self, slot_id: &SlotId) -> Result<&Arc<Mutex<Slot>>, StoreError> {
        self.slots.get(slot_id).ok_or_else(|| StoreError::NotFound { slot_id: slot_id.clone() })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn providers(&self) -> Result<Vec<Provider>, StoreError> {
        Ok(self.providers.clone())
    }

    async fn open_slots(
        &self,
        provider_id: &ProviderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        Ok(self
            .slots
            .values()
            .map(|cell| lock(&**cell).clone())
            .filter(|slot| {
                &slot.provider_id == provider_id
                    && slot.status == SlotStatus::Open
                    && slot.start >= from
                    && slot.start < until
            })
            .collect())
    }

    async fn slot(&self, slot_id: &SlotId) -> Result<Option<Slot>, StoreError> {
        Ok(self.slots.get(slot_id).map(|cell| lock(&**cell).clone()))
    }

    async fn try_book(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let cell = self.slot_cell(&appointment.slot_id)?;
        let mut slot = lock(&**cell);
        if slot.status != SlotStatus::Open {
            return Err(StoreError::Conflict { slot_id: slot.id.clone() });
        }

        let mut appointments = lock(&self.appointments);
        if appointments.contains_key(&appointment.confirmation_id) {
            return Err(StoreError::DuplicateConfirmation(appointment.confirmation_id.clone()));
        }
        slot.status = SlotStatus::Booked;
        slot.booked_by = Some(appointment.confirmation_id.clone());
        appointments.insert(appointment.confirmation_id.clone(), appointment.clone());
        Ok(())
    }

    async fn cancel(&self, confirmation_id: &ConfirmationId) -> Result<Appointment, StoreError> {
        let slot_id = lock(&self.appointments)
            .get(confirmation_id)
            .map(|appointment| appointment.slot_id.clone())
            .ok_or_else(|| StoreError::AppointmentNotFound(confirmation_id.clone()))?;

        let cell = self.slot_cell(&slot_id)?;
        let mut slot = lock(&**cell);
        let mut appointments = lock(&self.appointments);
        let appointment = appointments
            .get_mut(confirmation_id)
            .ok_or_else(|| StoreError::AppointmentNotFound(confirmation_id.clone()))?;
        if appointment.status == AppointmentStatus::Booked {
            appointment.status = AppointmentStatus::Cancelled;
        }
        if slot.booked_by.as_ref() == Some(confirmation_id) {
            slot.status = SlotStatus::Open;
            slot.booked_by = None;
        }
        Ok(appointment.clone())
    }

    async fn appointment(
        &self,
        confirmation_id: &ConfirmationId,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(lock(&self.appointments).get(confirmation_id).cloned())
    }
}

/// Practice-local time used for readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PracticeClock {
    pub offset: FixedOffset,
    pub label: String,
}

impl Default for PracticeClock {
    fn default() -> Self {
        Self { offset: Utc.fix(), label: "UTC".to_owned() }
    }
}

impl PracticeClock {
    pub fn from_offset_minutes(minutes: i32, label: impl Into<String>) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        let label = label.into();
        let label = if label.trim().is_empty() { format!("UTC{offset}") } else { label };
        Some(Self { offset, label })
    }

    /// Practice-local midnight of `date` as an instant.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::default());
        match self.offset.from_local_datetime(&midnight).single() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&midnight),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub appointment: Appointment,
    pub readback: Readback,
    pub notification_attempted: bool,
}

pub struct SchedulingOrchestrator {
    store: Arc<dyn AvailabilityStore>,
    records: Arc<dyn RecordLookup>,
    notifier: Arc<dyn NotificationGateway>,
    clock: PracticeClock,
    policy: ExternalCallPolicy,
}

impl SchedulingOrchestrator {
    pub fn new(
        store: Arc<dyn AvailabilityStore>,
        records: Arc<dyn RecordLookup>,
        notifier: Arc<dyn NotificationGateway>,
        clock: PracticeClock,
        policy: ExternalCallPolicy,
    ) -> Self {
        Self { store, records, notifier, clock, policy }
    }

    pub fn store(&self) -> Arc<dyn AvailabilityStore> {
        Arc::clone(&self.store)
    }

    pub async fn providers(&self) -> Result<Vec<Provider>, CallError> {
        let store = Arc::clone(&self.store);
        let mut providers = call_external("list_providers", &self.policy, || {
            let store = Arc::clone(&store);
            async move { store.providers().await }
        })
        .await
        .map_err(|_| timeout("list_providers"))?;
        providers.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(providers)
    }

    /// Open slots for the provider between two practice-local dates
    /// (inclusive). Advisory only: `book` re-checks the slot.
    pub async fn get_availability(
        &self,
        provider_id: &ProviderId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        visit_type: Option<VisitType>,
    ) -> Result<Vec<Slot>, CallError> {
        let from = self.clock.start_of(start_date);
        let until = self.clock.start_of(end_date.succ_opt().unwrap_or(end_date));
        if until <= from {
            return Ok(Vec::new());
        }

        let store = Arc::clone(&self.store);
        let mut slots = call_external("get_availability", &self.policy, || {
            let store = Arc::clone(&store);
            let provider_id = provider_id.clone();
            async move { store.open_slots(&provider_id, from, until).await }
        })
        .await
        .map_err(|_| timeout("get_availability"))?;

        if let Some(visit_type) = visit_type {
            slots.retain(|slot| slot.accepts(visit_type));
        }
        slots.sort_by(|left, right| left.start.cmp(&right.start).then(left.id.cmp(&right.id)));
        Ok(slots)
    }

    /// Books a slot for a verified caller. Only a gate-issued booking token
    /// is accepted; session and record come from it. The slot is re-read here
    /// rather than trusted from an earlier availability answer, and the
    /// store's check-and-set decides any race.
    pub async fn book(&self, tool: &AuthorizedTool) -> Result<BookingReceipt, CallError> {
        let denied = CallError::GateDenied { tool: ToolKind::BookAppointment };
        let ToolRequest::BookAppointment { slot_id, visit_type } = tool.request() else {
            return Err(denied);
        };
        let (CallState::Verified, Some(record_id)) = (tool.authorized_in(), tool.record()) else {
            return Err(denied);
        };
        let session_id = tool.session_id();
        let visit_type = *visit_type;

        let store = Arc::clone(&self.store);
        let slot = call_external("slot_lookup", &self.policy, || {
            let store = Arc::clone(&store);
            let slot_id = slot_id.clone();
            async move { store.slot(&slot_id).await }
        })
        .await
        .map_err(|_| timeout("slot_lookup"))?
        .ok_or_else(|| CallError::SlotNotFound { slot_id: slot_id.clone() })?;

        if slot.status != SlotStatus::Open {
            return Err(CallError::SlotConflict { slot_id: slot_id.clone() });
        }
        if !slot.accepts(visit_type) {
            return Err(CallError::VisitTypeMismatch { slot_id: slot_id.clone(), requested: visit_type });
        }

        let appointment = self.commit(&slot, record_id, visit_type).await?;
        info!(
            event_name = "scheduling.slot_booked",
            session_id = %session_id,
            slot_id = %slot.id,
            confirmation_id = %appointment.confirmation_id,
        );

        let readback = self.readback(&appointment).await;
        let notification_attempted = self.dispatch_notification(session_id, record_id, &readback).await;

        Ok(BookingReceipt { appointment, readback, notification_attempted })
    }

    /// Cancels a booking and reopens the slot.
    pub async fn cancel(&self, confirmation_id: &ConfirmationId) -> Result<Appointment, CallError> {
        match tokio::time::timeout(self.policy.timeout, self.store.cancel(confirmation_id)).await {
            Ok(Ok(appointment)) => {
                info!(
                    event_name = "scheduling.appointment_cancelled",
                    confirmation_id = %confirmation_id,
                    slot_id = %appointment.slot_id,
                );
                Ok(appointment)
            }
            Ok(Err(error)) => {
                warn!(event_name = "scheduling.cancel_failed", error = %error);
                Err(timeout("cancel_appointment"))
            }
            Err(_) => Err(timeout("cancel_appointment")),
        }
    }

    /// The check-and-set is not retried after a timeout: the first attempt
    /// may have committed, and a retry would then report our own booking as
    /// a conflict.
    async fn commit(
        &self,
        slot: &Slot,
        record_id: &RecordId,
        visit_type: VisitType,
    ) -> Result<Appointment, CallError> {
        for _ in 0..CONFIRMATION_ATTEMPTS {
            let appointment = Appointment {
                confirmation_id: ConfirmationId::generate(),
                slot_id: slot.id.clone(),
                record_id: record_id.clone(),
                provider_id: slot.provider_id.clone(),
                start: slot.start,
                end: slot.end,
                visit_type,
                status: AppointmentStatus::Booked,
                created_at: Utc::now(),
            };

            match tokio::time::timeout(self.policy.timeout, self.store.try_book(&appointment)).await
            {
                Ok(Ok(())) => return Ok(appointment),
                Ok(Err(StoreError::DuplicateConfirmation(_))) => continue,
                Ok(Err(StoreError::Conflict { slot_id })) => {
                    info!(event_name = "scheduling.slot_conflict", slot_id = %slot_id);
                    return Err(CallError::SlotConflict { slot_id });
                }
                Ok(Err(StoreError::NotFound { slot_id })) => {
                    return Err(CallError::SlotNotFound { slot_id })
                }
                Ok(Err(error)) => {
                    warn!(event_name = "scheduling.commit_failed", error = %error);
                    return Err(timeout("book_appointment"));
                }
                Err(_) => return Err(timeout("book_appointment")),
            }
        }
        Err(timeout("book_appointment"))
    }

    async fn readback(&self, appointment: &Appointment) -> Readback {
        let provider_name = match tokio::time::timeout(self.policy.timeout, self.store.providers())
            .await
        {
            Ok(Ok(providers)) => providers
                .into_iter()
                .find(|provider| provider.id == appointment.provider_id)
                .map(|provider| provider.display_name),
            _ => None,
        };

        Readback {
            confirmation_id: appointment.confirmation_id.clone(),
            provider_id: appointment.provider_id.clone(),
            provider_name: provider_name.unwrap_or_else(|| appointment.provider_id.0.clone()),
            start_local: appointment.start.with_timezone(&self.clock.offset),
            timezone_label: self.clock.label.clone(),
            visit_type: appointment.visit_type,
        }
    }

    /// Fire-and-forget. Returns whether a dispatch was handed off.
    async fn dispatch_notification(
        &self,
        session_id: &SessionId,
        record_id: &RecordId,
        readback: &Readback,
    ) -> bool {
        let contact = match tokio::time::timeout(self.policy.timeout, self.records.get(record_id)).await
        {
            Ok(Ok(Some(record))) => record.contact,
            _ => {
                warn!(
                    event_name = "notification.skipped",
                    session_id = %session_id,
                    reason = "contact_unavailable",
                );
                return false;
            }
        };

        let request = NotificationRequest::booked(contact, readback);
        let notifier = Arc::clone(&self.notifier);
        let deadline = self.policy.timeout.max(Duration::from_millis(1));
        let task_session = session_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, notifier.send(&request)).await {
                Ok(Ok(())) => info!(
                    event_name = "notification.delivered",
                    session_id = %task_session,
                    appointment_ref = %request.appointment_ref,
                ),
                Ok(Err(error)) => warn!(
                    event_name = "notification.failed",
                    session_id = %task_session,
                    error = %error,
                ),
                Err(_) => warn!(
                    event_name = "notification.timed_out",
                    session_id = %task_session,
                ),
            }
        });
        info!(event_name = "notification.dispatch_attempted", session_id = %session_id);
        true
    }
}

fn timeout(operation: &str) -> CallError {
    CallError::ExternalTimeout { operation: operation.to_owned() }
}
