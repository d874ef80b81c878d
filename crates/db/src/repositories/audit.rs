use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::audit::{
    AuditActor, AuditCategory, AuditError, AuditEvent, AuditOutcome, AuditSink,
};
use frontdesk_core::domain::session::SessionId;

use super::{decode_code, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Append-only audit storage. Rows are never updated or deleted.
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|error| AuditError::Unavailable(format!("metadata encode: {error}")))?;
        let sequence = i64::try_from(event.sequence)
            .map_err(|_| AuditError::Unavailable("sequence out of range".to_string()))?;

        let result = sqlx::query(
            "INSERT INTO audit_event (
                event_id,
                session_id,
                sequence,
                event_type,
                category,
                actor,
                outcome,
                metadata_json,
                occurred_at,
                prev_hash,
                entry_hash
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.session_id.0)
        .bind(sequence)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(event.actor.as_str())
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.prev_hash.as_deref())
        .bind(&event.entry_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(AuditError::DuplicateSequence {
                    session_id: event.session_id.clone(),
                    sequence: event.sequence,
                })
            }
            Err(error) => Err(AuditError::Unavailable(error.to_string())),
        }
    }

    async fn events_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query(
            "SELECT
                event_id,
                session_id,
                sequence,
                event_type,
                category,
                actor,
                outcome,
                metadata_json,
                occurred_at,
                prev_hash,
                entry_hash
             FROM audit_event
             WHERE session_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AuditError::Unavailable(error.to_string()))?;

        rows.into_iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| AuditError::Unavailable(error.to_string()))
    }
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let sequence = row.try_get::<i64, _>("sequence")?;
    let sequence = u64::try_from(sequence)
        .map_err(|_| RepositoryError::Decode(format!("negative audit sequence {sequence}")))?;
    let metadata_json = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|error| RepositoryError::Decode(format!("audit metadata: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        session_id: SessionId(row.try_get("session_id")?),
        sequence,
        event_type: row.try_get("event_type")?,
        category: decode_code("category", row.try_get("category")?, AuditCategory::parse)?,
        actor: decode_code("actor", row.try_get("actor")?, AuditActor::parse)?,
        outcome: decode_code("outcome", row.try_get("outcome")?, AuditOutcome::parse)?,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use frontdesk_core::audit::{
        verify_chain, AuditActor, AuditCategory, AuditError, AuditEvent, AuditOutcome,
        AuditRecorder, AuditSink,
    };
    use frontdesk_core::domain::session::SessionId;
    use frontdesk_core::retry::BackoffPolicy;

    use super::SqlAuditSink;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn transition(session_id: &SessionId, name: &str) -> AuditEvent {
        AuditEvent::new(
            session_id.clone(),
            name,
            AuditCategory::Flow,
            AuditActor::System,
            AuditOutcome::Success,
        )
    }

    #[tokio::test]
    async fn recorded_chain_reads_back_in_order_and_verifies() {
        let pool = setup_pool().await;
        let sink = Arc::new(SqlAuditSink::new(pool));
        let recorder = AuditRecorder::new(sink.clone(), BackoffPolicy::default());
        let session_id = SessionId("call-sql-1".to_string());

        recorder
            .record(transition(&session_id, "flow.transition_applied").with_metadata("to", "greeting"))
            .await
            .expect("first event");
        recorder
            .record(
                transition(&session_id, "gate.verify_identity")
                    .with_metadata("claimed_name", "Jordan Rivera"),
            )
            .await
            .expect("second event");
        recorder
            .record(transition(&session_id, "flow.transition_applied").with_metadata("to", "verified"))
            .await
            .expect("third event");

        let events = sink.events_for_session(&session_id).await.expect("read back");
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().map(|event| event.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(events[1].metadata["claimed_name"].starts_with("redacted:"));

        let verification = verify_chain(&events);
        assert!(verification.valid, "{:?}", verification.failure_reason);
        assert_eq!(verification.verified_events, 3);
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected() {
        let pool = setup_pool().await;
        let sink = SqlAuditSink::new(pool);
        let session_id = SessionId("call-sql-2".to_string());

        let mut first = transition(&session_id, "flow.transition_applied");
        first.entry_hash = first.compute_hash();
        sink.append(&first).await.expect("first append");

        let mut second = transition(&session_id, "flow.transition_applied");
        second.entry_hash = second.compute_hash();
        let error = sink.append(&second).await.expect_err("same sequence");

        assert!(matches!(error, AuditError::DuplicateSequence { sequence: 0, .. }));
    }

    #[tokio::test]
    async fn sessions_do_not_see_each_other() {
        let pool = setup_pool().await;
        let sink = Arc::new(SqlAuditSink::new(pool));
        let recorder = AuditRecorder::new(sink.clone(), BackoffPolicy::default());
        let first = SessionId("call-a".to_string());
        let second = SessionId("call-b".to_string());

        recorder.record(transition(&first, "flow.transition_applied")).await.expect("a");
        recorder.record(transition(&second, "flow.transition_applied")).await.expect("b");
        recorder.record(transition(&second, "flow.transition_applied")).await.expect("b2");

        assert_eq!(sink.events_for_session(&first).await.expect("a events").len(), 1);
        assert_eq!(sink.events_for_session(&second).await.expect("b events").len(), 2);
    }
}
