use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::appointment::ConfirmationId;
use frontdesk_core::domain::record::RecordId;
use frontdesk_core::domain::session::{AbandonReason, CallState, Session, SessionId, Utterance};
use frontdesk_core::domain::slot::ProviderId;
use frontdesk_core::outcome::CallOutcome;

use super::{
    decode_code, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
    SessionRepository,
};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SESSION_SELECT: &str = "SELECT
    id,
    provider_id,
    state,
    outcome,
    verified_record,
    confirmed_appointment,
    emergency_triggered,
    abandon_reason,
    verification_failures,
    transcript_json,
    started_at,
    ended_at
 FROM call_session";

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("{SESSION_SELECT} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let transcript_json = serde_json::to_string(&session.transcript)
            .map_err(|error| RepositoryError::Decode(format!("transcript encode: {error}")))?;

        sqlx::query(
            "INSERT INTO call_session (
                id,
                provider_id,
                state,
                outcome,
                verified_record,
                confirmed_appointment,
                emergency_triggered,
                abandon_reason,
                verification_failures,
                transcript_json,
                started_at,
                ended_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&session.id.0)
        .bind(&session.provider_id.0)
        .bind(session.state.as_str())
        .bind(session.outcome.as_ref().map(CallOutcome::as_str))
        .bind(session.verified_record.as_ref().map(|id| id.0.as_str()))
        .bind(session.confirmed_appointment.as_ref().map(|id| id.0.as_str()))
        .bind(session.emergency_triggered)
        .bind(session.abandon_reason.as_ref().map(AbandonReason::as_str))
        .bind(i64::from(session.verification_failures))
        .bind(transcript_json)
        .bind(session.started_at.to_rfc3339())
        .bind(session.ended_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_outcome(
        &self,
        outcome: CallOutcome,
        limit: u32,
    ) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SESSION_SELECT} WHERE outcome = ? ORDER BY started_at DESC LIMIT ?"
        ))
        .bind(outcome.as_str())
        .bind(i64::from(limit.max(1)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let transcript_json = row.try_get::<String, _>("transcript_json")?;
    let transcript: Vec<Utterance> = serde_json::from_str(&transcript_json)
        .map_err(|error| RepositoryError::Decode(format!("transcript: {error}")))?;
    let outcome = row
        .try_get::<Option<String>, _>("outcome")?
        .map(|raw| decode_code("call outcome", raw, CallOutcome::parse))
        .transpose()?;
    let abandon_reason = row
        .try_get::<Option<String>, _>("abandon_reason")?
        .map(|raw| decode_code("abandon reason", raw, AbandonReason::parse))
        .transpose()?;
    let started_at = parse_timestamp("started_at", row.try_get("started_at")?)?;
    let last_activity_at = transcript.last().map(|utterance| utterance.at).unwrap_or(started_at);

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        provider_id: ProviderId(row.try_get("provider_id")?),
        state: decode_code("call state", row.try_get("state")?, CallState::parse)?,
        verified_record: row.try_get::<Option<String>, _>("verified_record")?.map(RecordId),
        outcome,
        started_at,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at")?)?,
        transcript,
        verification_failures: parse_u32(
            "verification_failures",
            row.try_get("verification_failures")?,
        )?,
        pending_readback: None,
        confirmed_appointment: row
            .try_get::<Option<String>, _>("confirmed_appointment")?
            .map(ConfirmationId),
        emergency_triggered: row.try_get("emergency_triggered")?,
        abandon_reason,
        last_activity_at,
    })
}
