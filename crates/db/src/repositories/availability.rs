use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::appointment::{Appointment, AppointmentStatus, ConfirmationId};
use frontdesk_core::domain::record::RecordId;
use frontdesk_core::domain::slot::{Provider, ProviderId, Slot, SlotId, SlotStatus, VisitType};
use frontdesk_core::scheduling::{AvailabilityStore, StoreError};

use super::{decode_code, encode_instant, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Slot and appointment storage. Booking is one conditional update inside a
/// transaction; the affected row count decides which caller won the slot.
pub struct SqlAvailabilityStore {
    pool: DbPool,
}

impl SqlAvailabilityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_provider(&self, provider: &Provider) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO provider (id, display_name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
        )
        .bind(&provider.id.0)
        .bind(&provider.display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a slot; an existing slot with the same id is left untouched.
    pub async fn insert_slot(&self, slot: &Slot) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO slot (id, provider_id, start_at, end_at, visit_type, status, booked_by)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&slot.id.0)
        .bind(&slot.provider_id.0)
        .bind(encode_instant(&slot.start))
        .bind(encode_instant(&slot.end))
        .bind(slot.visit_type.as_str())
        .bind(slot.status.as_str())
        .bind(slot.booked_by.as_ref().map(|id| id.0.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn unavailable(error: sqlx::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn undecodable(error: RepositoryError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

#[async_trait]
impl AvailabilityStore for SqlAvailabilityStore {
    async fn providers(&self) -> Result<Vec<Provider>, StoreError> {
        let rows = sqlx::query("SELECT id, display_name FROM provider ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.into_iter()
            .map(|row| {
                Ok(Provider {
                    id: ProviderId(row.try_get("id").map_err(unavailable)?),
                    display_name: row.try_get("display_name").map_err(unavailable)?,
                })
            })
            .collect()
    }

    async fn open_slots(
        &self,
        provider_id: &ProviderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, provider_id, start_at, end_at, visit_type, status, booked_by
             FROM slot
             WHERE provider_id = ? AND status = 'open' AND start_at >= ? AND start_at < ?
             ORDER BY start_at ASC, id ASC",
        )
        .bind(&provider_id.0)
        .bind(encode_instant(&from))
        .bind(encode_instant(&until))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(|row| slot_from_row(row).map_err(undecodable)).collect()
    }

    async fn slot(&self, slot_id: &SlotId) -> Result<Option<Slot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, provider_id, start_at, end_at, visit_type, status, booked_by
             FROM slot
             WHERE id = ?",
        )
        .bind(&slot_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(slot_from_row).transpose().map_err(undecodable)
    }

    async fn try_book(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let claimed = sqlx::query(
            "UPDATE slot SET status = 'booked', booked_by = ? WHERE id = ? AND status = 'open'",
        )
        .bind(&appointment.confirmation_id.0)
        .bind(&appointment.slot_id.0)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        if claimed.rows_affected() == 0 {
            let exists = sqlx::query("SELECT id FROM slot WHERE id = ?")
                .bind(&appointment.slot_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unavailable)?
                .is_some();
            tx.rollback().await.map_err(unavailable)?;
            let slot_id = appointment.slot_id.clone();
            return Err(if exists {
                StoreError::Conflict { slot_id }
            } else {
                StoreError::NotFound { slot_id }
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO appointment (
                confirmation_id,
                slot_id,
                record_id,
                provider_id,
                start_at,
                end_at,
                visit_type,
                status,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&appointment.confirmation_id.0)
        .bind(&appointment.slot_id.0)
        .bind(&appointment.record_id.0)
        .bind(&appointment.provider_id.0)
        .bind(encode_instant(&appointment.start))
        .bind(encode_instant(&appointment.end))
        .bind(appointment.visit_type.as_str())
        .bind(appointment.status.as_str())
        .bind(appointment.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => tx.commit().await.map_err(unavailable),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                tx.rollback().await.map_err(unavailable)?;
                Err(StoreError::DuplicateConfirmation(appointment.confirmation_id.clone()))
            }
            Err(error) => {
                tx.rollback().await.map_err(unavailable)?;
                Err(unavailable(error))
            }
        }
    }

    async fn cancel(&self, confirmation_id: &ConfirmationId) -> Result<Appointment, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let row = sqlx::query(&format!("{APPOINTMENT_SELECT} WHERE confirmation_id = ?"))
            .bind(&confirmation_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        let Some(row) = row else {
            tx.rollback().await.map_err(unavailable)?;
            return Err(StoreError::AppointmentNotFound(confirmation_id.clone()));
        };
        let mut appointment = appointment_from_row(row).map_err(undecodable)?;

        sqlx::query("UPDATE appointment SET status = 'cancelled' WHERE confirmation_id = ?")
            .bind(&confirmation_id.0)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query(
            "UPDATE slot SET status = 'open', booked_by = NULL WHERE id = ? AND booked_by = ?",
        )
        .bind(&appointment.slot_id.0)
        .bind(&confirmation_id.0)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;
        appointment.status = AppointmentStatus::Cancelled;
        Ok(appointment)
    }

    async fn appointment(
        &self,
        confirmation_id: &ConfirmationId,
    ) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query(&format!("{APPOINTMENT_SELECT} WHERE confirmation_id = ?"))
            .bind(&confirmation_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(appointment_from_row).transpose().map_err(undecodable)
    }
}

const APPOINTMENT_SELECT: &str = "SELECT
    confirmation_id,
    slot_id,
    record_id,
    provider_id,
    start_at,
    end_at,
    visit_type,
    status,
    created_at
 FROM appointment";

fn slot_from_row(row: SqliteRow) -> Result<Slot, RepositoryError> {
    Ok(Slot {
        id: SlotId(row.try_get("id")?),
        provider_id: ProviderId(row.try_get("provider_id")?),
        start: parse_timestamp("start_at", row.try_get("start_at")?)?,
        end: parse_timestamp("end_at", row.try_get("end_at")?)?,
        visit_type: decode_code("visit_type", row.try_get("visit_type")?, VisitType::parse)?,
        status: decode_code("slot status", row.try_get("status")?, SlotStatus::parse)?,
        booked_by: row.try_get::<Option<String>, _>("booked_by")?.map(ConfirmationId),
    })
}

fn appointment_from_row(row: SqliteRow) -> Result<Appointment, RepositoryError> {
    Ok(Appointment {
        confirmation_id: ConfirmationId(row.try_get("confirmation_id")?),
        slot_id: SlotId(row.try_get("slot_id")?),
        record_id: RecordId(row.try_get("record_id")?),
        provider_id: ProviderId(row.try_get("provider_id")?),
        start: parse_timestamp("start_at", row.try_get("start_at")?)?,
        end: parse_timestamp("end_at", row.try_get("end_at")?)?,
        visit_type: decode_code("visit_type", row.try_get("visit_type")?, VisitType::parse)?,
        status: decode_code(
            "appointment status",
            row.try_get("status")?,
            AppointmentStatus::parse,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
